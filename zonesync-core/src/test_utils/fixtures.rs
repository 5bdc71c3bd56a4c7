//! Fixtures for zones, deltas and configurations

use crate::config::{Config, TransportConfig};
use crate::core_sync::ConflictPolicy;
use crate::core_zone::{DeltaSource, GeoPoint, Timestamp, ZoneDelta, ZoneSnapshot};
use std::time::Duration;

pub const TEST_PLAYER: &str = "player-test";
pub const TEST_GAME: &str = "game-test";

/// Zone snapshot at a fixed center holding `cells`
pub fn zone(cells: &[&str]) -> ZoneSnapshot {
    ZoneSnapshot::new(GeoPoint::new(52.52, 13.405), 250.0).with_cells(cells.iter().copied())
}

/// Builder for deltas with explicit timestamps
#[derive(Debug, Clone)]
pub struct DeltaBuilder {
    delta: ZoneDelta,
}

impl DeltaBuilder {
    pub fn local(at: u64) -> Self {
        Self { delta: ZoneDelta::new(DeltaSource::Manager, Timestamp(at)) }
    }

    pub fn server(at: u64) -> Self {
        Self { delta: ZoneDelta::new(DeltaSource::Server, Timestamp(at)) }
    }

    pub fn add(mut self, cells: &[&str]) -> Self {
        for cell in cells {
            self.delta = self.delta.add(*cell);
        }
        self
    }

    pub fn remove(mut self, cells: &[&str]) -> Self {
        for cell in cells {
            self.delta = self.delta.remove(*cell);
        }
        self
    }

    pub fn modify(mut self, cells: &[&str]) -> Self {
        for cell in cells {
            self.delta = self.delta.modify(*cell);
        }
        self
    }

    pub fn build(self) -> ZoneDelta {
        self.delta
    }
}

/// Transport settings with millisecond-scale timers for tests
pub fn fast_transport_config() -> TransportConfig {
    TransportConfig {
        url: "memory".to_string(),
        player_id: TEST_PLAYER.to_string(),
        game_id: TEST_GAME.to_string(),
        max_reconnect_attempts: 5,
        reconnect_base_delay: Duration::from_millis(10),
        reconnect_max_delay: Duration::from_millis(80),
        reconnect_jitter: 0.0,
        connect_timeout: Duration::from_secs(1),
        heartbeat_interval: Duration::from_secs(30),
        heartbeat_timeout: Duration::from_secs(30),
        ack_timeout: Duration::from_secs(30),
        outbound_queue_capacity: 64,
        auto_connect: true,
    }
}

/// Full configuration around [`fast_transport_config`]
pub fn test_config(policy: ConflictPolicy) -> Config {
    let mut config = Config { transport: fast_transport_config(), ..Config::default() };
    config.sync.conflict_policy = policy;
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_builder() {
        let delta = DeltaBuilder::server(7).add(&["a", "b"]).remove(&["c"]).modify(&["d"]).build();
        assert_eq!(delta.source, DeltaSource::Server);
        assert_eq!(delta.timestamp, Timestamp(7));
        assert_eq!(delta.added.len(), 2);
        assert!(delta.validate().is_ok());
    }

    #[test]
    fn test_configs_validate() {
        assert!(test_config(ConflictPolicy::Merge).validate().is_ok());
        assert_eq!(zone(&["x", "y"]).len(), 2);
    }
}
