//! 다이제스트 유틸리티
//!
//! SHA-1 (160비트) 다이제스트와 로그/비교용 소문자 hex 표현

use std::fmt;

use serde::{Deserialize, Serialize};
use sha1::{Digest as _, Sha1};

/// 다이제스트 길이 (바이트)
pub const DIGEST_LEN: usize = 20;

/// 160비트 다이제스트
///
/// 바이트 단위로만 비교하며 부분적으로 신뢰하지 않음
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// 바이트 범위의 다이제스트 계산
    pub fn of(data: &[u8]) -> Self {
        let mut out = [0u8; DIGEST_LEN];
        out.copy_from_slice(&Sha1::digest(data));
        Self(out)
    }

    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// 소문자 hex 문자열
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self)
    }
}
