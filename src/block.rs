//! 패킷과 블록 정의
//!
//! - Packet: 데이터 패킷 하나에 실리는 최대 500바이트 조각
//! - Block: 연속된 최대 250개 패킷 (125,000바이트), 다이제스트 확인 단위

use std::ops::Range;

use bytes::BytesMut;

use crate::hash::Digest;
use crate::message::PacketIndex;
use crate::{PACKETS_PER_BLOCK, PACKET_PAYLOAD_SIZE};

/// 블록 하나의 바이트 크기
pub const BLOCK_SIZE: usize = PACKETS_PER_BLOCK * PACKET_PAYLOAD_SIZE;

/// 파일 크기에서 유도되는 패킷/블록 경계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileLayout {
    size: usize,
}

/// 블록 하나의 경계
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// 블록 번호 (0부터)
    pub number: u32,

    /// 블록에 속한 패킷 인덱스 범위
    pub packets: Range<PacketIndex>,

    /// 블록이 덮는 바이트 범위
    pub bytes: Range<usize>,
}

impl Block {
    /// 블록 확인 메시지에 실리는 시작 패킷 인덱스
    pub fn first_packet(&self) -> PacketIndex {
        self.packets.start
    }
}

impl FileLayout {
    pub fn new(size: usize) -> Self {
        Self { size }
    }

    /// ceil(size / 500)
    pub fn packet_count(&self) -> u32 {
        self.size.div_ceil(PACKET_PAYLOAD_SIZE) as u32
    }

    /// ceil(packet_count / 250)
    pub fn block_count(&self) -> u32 {
        (self.packet_count() as usize).div_ceil(PACKETS_PER_BLOCK) as u32
    }

    /// 패킷이 덮는 바이트 범위, 파일 밖이면 None
    pub fn packet_range(&self, index: PacketIndex) -> Option<Range<usize>> {
        let start = (index as usize).checked_mul(PACKET_PAYLOAD_SIZE)?;
        if start >= self.size {
            return None;
        }
        Some(start..(start + PACKET_PAYLOAD_SIZE).min(self.size))
    }

    /// 블록 확인 범위: 시작 패킷부터 최대 BLOCK_SIZE 바이트 또는 파일 끝까지
    pub fn check_range(&self, first_packet: PacketIndex) -> Option<Range<usize>> {
        let start = (first_packet as usize).checked_mul(PACKET_PAYLOAD_SIZE)?;
        if start > self.size {
            return None;
        }
        Some(start..(start + BLOCK_SIZE).min(self.size))
    }

    /// n번째 블록
    pub fn block(&self, number: u32) -> Option<Block> {
        if number >= self.block_count() {
            return None;
        }

        let first = number * PACKETS_PER_BLOCK as u32;
        let last = (first + PACKETS_PER_BLOCK as u32).min(self.packet_count());
        let bytes = self.check_range(first)?;

        Some(Block {
            number,
            packets: first..last,
            bytes,
        })
    }

    pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
        (0..self.block_count()).filter_map(move |n| self.block(n))
    }
}

/// 서버측 재조립 버퍼
///
/// 위치 기반 덮어쓰기이므로 순서가 바뀌거나 중복된 패킷도 안전함
#[derive(Debug)]
pub struct ReassemblyBuffer {
    layout: FileLayout,

    data: BytesMut,

    /// 수신된 패킷 비트맵 (packet index -> 수신 여부)
    received: Vec<bool>,

    /// 서로 다른 수신 패킷 수
    received_count: u32,
}

impl ReassemblyBuffer {
    pub fn new(size: usize) -> Self {
        let layout = FileLayout::new(size);
        let mut data = BytesMut::with_capacity(size);
        data.resize(size, 0);

        Self {
            received: vec![false; layout.packet_count() as usize],
            layout,
            data,
            received_count: 0,
        }
    }

    pub fn layout(&self) -> FileLayout {
        self.layout
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 패킷 쓰기, 선언된 크기로 잘라냄
    ///
    /// 파일 범위 밖의 인덱스면 None, 아니면 내용이 바뀌었는지 여부
    pub fn write_packet(&mut self, index: PacketIndex, payload: &[u8]) -> Option<bool> {
        let range = self.layout.packet_range(index)?;

        let len = payload.len().min(range.len());
        let target = &mut self.data[range.start..range.start + len];
        let changed = target[..] != payload[..len];
        target.copy_from_slice(&payload[..len]);

        let slot = &mut self.received[index as usize];
        if !*slot {
            *slot = true;
            self.received_count += 1;
        }
        Some(changed)
    }

    /// 블록 확인 다이제스트 (메모리 내용만 사용)
    pub fn check_digest(&self, first_packet: PacketIndex) -> Option<Digest> {
        self.layout
            .check_range(first_packet)
            .map(|range| Digest::of(&self.data[range]))
    }

    pub fn digest(&self) -> Digest {
        Digest::of(&self.data)
    }

    pub fn received_count(&self) -> u32 {
        self.received_count
    }

    /// 아직 한 번도 받지 못한 패킷 수
    pub fn missing_count(&self) -> u32 {
        self.layout.packet_count() - self.received_count
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}
