use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::{self, Interval, MissedTickBehavior};

/// Issues public paste identifiers.
#[rocket::async_trait]
pub trait IdAllocator: Send + Sync {
    async fn next_id(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdStrategy {
    Tick,
    Random,
}

impl Default for IdStrategy {
    fn default() -> Self {
        IdStrategy::Tick
    }
}

/// One id per tick: the current unix time as 4 little-endian bytes in
/// unpadded URL-safe base64 (6 characters). Callers queue on the ticker, so
/// a single instance hands out one id per interval at most.
pub struct TickAllocator {
    period: Duration,
    state: Mutex<TickState>,
}

struct TickState {
    // created on first use, an Interval needs a running runtime
    ticker: Option<Interval>,
    last: Option<u32>,
}

impl TickAllocator {
    pub fn new(period: Duration) -> Self {
        TickAllocator {
            period,
            state: Mutex::new(TickState {
                ticker: None,
                last: None,
            }),
        }
    }
}

#[rocket::async_trait]
impl IdAllocator for TickAllocator {
    async fn next_id(&self) -> String {
        let mut state = self.state.lock().await;
        let period = self.period;
        let ticker = state.ticker.get_or_insert_with(|| {
            let mut ticker = time::interval(period);
            // an idle allocator must not release a burst of ticks
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        ticker.tick().await;

        let now = unix_now();
        let timestamp = match state.last {
            // wall clock went backwards, or ticks are shorter than a second
            Some(last) if now <= last => last.wrapping_add(1),
            _ => now,
        };
        state.last = Some(timestamp);
        encode_timestamp(timestamp)
    }
}

/// Unthrottled: 6 random bytes (8 characters). Uniqueness is left to the
/// repository's primary key, the upload pipeline retries on a collision.
#[derive(Debug, Default)]
pub struct RandomAllocator;

#[rocket::async_trait]
impl IdAllocator for RandomAllocator {
    async fn next_id(&self) -> String {
        let bytes: [u8; 6] = rand::random();
        base64::encode_config(bytes, base64::URL_SAFE_NO_PAD)
    }
}

pub fn allocator(strategy: IdStrategy, period: Duration) -> Box<dyn IdAllocator> {
    match strategy {
        IdStrategy::Tick => Box::new(TickAllocator::new(period)),
        IdStrategy::Random => Box::new(RandomAllocator),
    }
}

pub fn encode_timestamp(timestamp: u32) -> String {
    base64::encode_config(timestamp.to_le_bytes(), base64::URL_SAFE_NO_PAD)
}

pub fn decode_timestamp(id: &str) -> Option<u32> {
    let bytes = base64::decode_config(id, base64::URL_SAFE_NO_PAD).ok()?;
    let bytes: [u8; 4] = bytes.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}
