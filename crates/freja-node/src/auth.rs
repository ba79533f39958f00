// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Validates bearer tokens against a stored SHA-256 digest.
///
/// Comparing digests rather than raw tokens keeps the comparison inputs
/// fixed-length, and `ConstantTimeEq` keeps it timing-safe.
#[derive(Clone)]
pub struct TokenGuard {
    expected: Option<[u8; 32]>,
}

impl TokenGuard {
    /// `None` disables authentication (loopback-only deployments).
    pub fn new(token: Option<&str>) -> Self {
        Self {
            expected: token.map(|t| Sha256::digest(t.as_bytes()).into()),
        }
    }

    pub fn auth_enabled(&self) -> bool {
        self.expected.is_some()
    }

    /// Check an `Authorization` header value.
    pub fn check(&self, authorization: Option<&str>) -> bool {
        let Some(expected) = &self.expected else {
            return true;
        };
        let Some(header) = authorization else {
            return false;
        };
        let Some(presented) = header.strip_prefix("Bearer ") else {
            return false;
        };
        let digest: [u8; 32] = Sha256::digest(presented.as_bytes()).into();
        digest.ct_eq(expected).into()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
