use std::time::Duration;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::net::{
    AVATAR_ITEM_LEN, BODY_ITEM_LEN, DEFAULT_TICK_RATE, INPUT_ITEM_LEN, MAX_DATAGRAM, MAX_PAYLOAD,
    RELIABLE_HEADER_LEN, STATE_UPDATE_HEADER_LEN,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("tick rate must be positive")]
    ZeroTickRate,
    #[error("aging weights must satisfy input > avatar > body > 0, got {0:?}")]
    InvalidAging(AgingWeights),
    #[error("category sizes must be non-zero, got {0:?}")]
    ZeroSize(CategorySizes),
    #[error("payload budget of {max_payload} bytes cannot hold a single item ({needed} needed)")]
    PayloadTooSmall { max_payload: usize, needed: usize },
    #[error("payload budget of {max_payload} bytes exceeds the {limit} byte datagram limit")]
    PayloadTooLarge { max_payload: usize, limit: usize },
}

/// Per-tick priority increments for each replicated category.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgingWeights {
    pub input: f32,
    pub avatar: f32,
    pub body: f32,
}

impl Default for AgingWeights {
    fn default() -> Self {
        Self {
            input: 3.0,
            avatar: 2.0,
            body: 1.0,
        }
    }
}

impl AgingWeights {
    pub fn is_valid(&self) -> bool {
        [self.input, self.avatar, self.body]
            .iter()
            .all(|w| w.is_finite())
            && self.input > self.avatar
            && self.avatar > self.body
            && self.body > 0.0
    }
}

/// Serialized size of one item per category, in bytes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CategorySizes {
    pub input: usize,
    pub avatar: usize,
    pub body: usize,
}

impl Default for CategorySizes {
    fn default() -> Self {
        Self {
            input: INPUT_ITEM_LEN,
            avatar: AVATAR_ITEM_LEN,
            body: BODY_ITEM_LEN,
        }
    }
}

impl CategorySizes {
    pub fn smallest(&self) -> usize {
        self.input.min(self.avatar).min(self.body)
    }

    /// Per-category maximum of `self` and `floor`.
    pub fn at_least(&self, floor: &CategorySizes) -> CategorySizes {
        CategorySizes {
            input: self.input.max(floor.input),
            avatar: self.avatar.max(floor.avatar),
            body: self.body.max(floor.body),
        }
    }

    /// Sizes the codec actually writes.
    pub fn encoded() -> CategorySizes {
        CategorySizes::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReplicationConfig {
    pub tick_rate: u32,
    /// Ceiling for one encoded state update, message header included and
    /// transport framing excluded. The transport adds its own frame header on
    /// top; `validate` keeps the sum within one datagram.
    pub max_payload: usize,
    pub aging: AgingWeights,
    pub sizes: CategorySizes,
    pub spawn_position: Vec3,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            max_payload: MAX_PAYLOAD,
            aging: AgingWeights::default(),
            sizes: CategorySizes::default(),
            spawn_position: Vec3::new(0.0, 1.0, 0.0),
        }
    }
}

impl ReplicationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::ZeroTickRate);
        }
        if !self.aging.is_valid() {
            return Err(ConfigError::InvalidAging(self.aging));
        }
        if self.sizes.smallest() == 0 {
            return Err(ConfigError::ZeroSize(self.sizes));
        }

        let needed = STATE_UPDATE_HEADER_LEN + self.sizes.smallest();
        if self.max_payload < needed {
            return Err(ConfigError::PayloadTooSmall {
                max_payload: self.max_payload,
                needed,
            });
        }
        let limit = MAX_DATAGRAM - RELIABLE_HEADER_LEN;
        if self.max_payload > limit {
            return Err(ConfigError::PayloadTooLarge {
                max_payload: self.max_payload,
                limit,
            });
        }
        Ok(())
    }

    /// Bytes left for items once the state update header is written.
    pub fn item_budget(&self) -> usize {
        self.max_payload.saturating_sub(STATE_UPDATE_HEADER_LEN)
    }

    pub fn dt(&self) -> f32 {
        1.0 / self.tick_rate.max(1) as f32
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ReplicationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.item_budget(), 1200 - 11);
        assert_eq!(config.sizes.smallest(), INPUT_ITEM_LEN);
    }

    #[test]
    fn aging_order_is_enforced() {
        let mut config = ReplicationConfig::default();
        config.aging.body = config.aging.avatar;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidAging(_))
        ));

        config.aging = AgingWeights {
            input: 3.0,
            avatar: 2.0,
            body: 0.0,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn payload_must_fit_header_and_one_item() {
        let config = ReplicationConfig {
            max_payload: STATE_UPDATE_HEADER_LEN + INPUT_ITEM_LEN - 1,
            ..ReplicationConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::PayloadTooSmall {
                max_payload: STATE_UPDATE_HEADER_LEN + INPUT_ITEM_LEN - 1,
                needed: STATE_UPDATE_HEADER_LEN + INPUT_ITEM_LEN,
            })
        );
    }

    #[test]
    fn sizes_are_raised_to_the_floor() {
        let configured = CategorySizes {
            input: 17,
            avatar: 45,
            body: 40,
        };
        assert_eq!(
            configured.at_least(&CategorySizes::encoded()),
            CategorySizes {
                input: 17,
                avatar: AVATAR_ITEM_LEN,
                body: BODY_ITEM_LEN,
            }
        );
    }

    #[test]
    fn payload_leaves_room_for_transport_framing() {
        let limit = MAX_DATAGRAM - RELIABLE_HEADER_LEN;
        let config = ReplicationConfig {
            max_payload: limit + 1,
            ..ReplicationConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::PayloadTooLarge {
                max_payload: limit + 1,
                limit,
            })
        );

        let config = ReplicationConfig {
            max_payload: limit,
            ..ReplicationConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
