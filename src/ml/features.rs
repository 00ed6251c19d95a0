//! Feature preprocessor for the sequence model.
//!
//! Turns a normalized transaction into a fixed 50-column vector and
//! maintains per-scope sliding buffers of those vectors to form model
//! sequences. Categorical encoding uses FNV-1a so encodings are stable
//! across process restarts — assessments must be reproducible.

use crate::models::Transaction;
use chrono::{Datelike, Timelike};
use nalgebra::DMatrix;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;

pub const FEATURE_WIDTH: usize = 50;
pub const DEFAULT_SEQUENCE_LENGTH: usize = 10;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Seed-free FNV-1a. Deliberately not the std hasher: the encoding must
/// not change between runs or hosts.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Categorical value -> [0, 1) in 1/1000 steps.
fn encode_categorical(value: &str) -> f64 {
    (fnv1a(value.as_bytes()) % 1000) as f64 / 1000.0
}

/// IPv4 as a fraction of the address space; anything unparseable is 0.
fn encode_ip(ip: Option<&str>) -> f64 {
    match ip.and_then(|s| s.parse::<Ipv4Addr>().ok()) {
        Some(addr) => u32::from(addr) as f64 / 4_294_967_296.0,
        None => 0.0,
    }
}

/// Build the 50-wide feature vector for one transaction.
///
/// Column order is part of the model contract:
/// amount, user_id, payment_method, merchant_id, currency, hour, weekday,
/// day-of-month, month, device_fingerprint, ip, then zero padding.
pub fn feature_vector(tx: &Transaction) -> Vec<f64> {
    let mut features = Vec::with_capacity(FEATURE_WIDTH);

    features.push(tx.amount);
    features.push(tx.user_id as f64);
    features.push(encode_categorical(&tx.payment_method));
    features.push(encode_categorical(&tx.merchant_id));
    features.push(encode_categorical(&tx.currency));

    features.push(tx.timestamp.hour() as f64);
    features.push(tx.timestamp.weekday().num_days_from_monday() as f64);
    features.push(tx.timestamp.day() as f64);
    features.push(tx.timestamp.month() as f64);

    features.push(encode_categorical(
        tx.device_fingerprint.as_deref().unwrap_or("unknown"),
    ));
    features.push(encode_ip(tx.ip_address.as_deref()));

    features.resize(FEATURE_WIDTH, 0.0);
    features
}

/// Sliding buffers of recent feature vectors, keyed per scope (one scope
/// per user). A buffer yields an L x 50 sequence once it holds L vectors.
pub struct SequenceBuffers {
    buffers: Mutex<HashMap<i64, VecDeque<Vec<f64>>>>,
    sequence_length: usize,
}

impl SequenceBuffers {
    pub fn new(sequence_length: usize) -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            sequence_length,
        }
    }

    /// Append the transaction's features to its scope buffer and return
    /// the current sequence (oldest row first) once the buffer is full.
    pub fn push(&self, scope: i64, tx: &Transaction) -> Option<DMatrix<f64>> {
        let features = feature_vector(tx);

        let mut buffers = self.buffers.lock();
        let buffer = buffers.entry(scope).or_default();
        buffer.push_back(features);
        if buffer.len() > self.sequence_length {
            buffer.pop_front();
        }

        if buffer.len() == self.sequence_length {
            let mut sequence = DMatrix::zeros(self.sequence_length, FEATURE_WIDTH);
            for (row, features) in buffer.iter().enumerate() {
                for (col, &value) in features.iter().enumerate() {
                    sequence[(row, col)] = value;
                }
            }
            Some(sequence)
        } else {
            None
        }
    }

    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }
}
