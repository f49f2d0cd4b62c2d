use rdkafka::config::ClientConfig;
use serde::Deserialize;

// ============================================================================
// Pipeline Configuration
// ============================================================================
//
// Values only: binding these from files or the environment is the hosting
// process's concern. The one piece of logic that lives here is role
// resolution, which turns the raw topic/group lists into a per-role lookup
// table exactly once, at startup. Missing or ambiguous entries fail fast
// before any consume loop runs.
//
// ============================================================================

/// Logical role of a consumer connection and its topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Primary,
    Retry,
}

impl Role {
    /// Fixed fragment that the role's topic name must contain.
    pub fn topic_fragment(self) -> &'static str {
        match self {
            Role::Primary => "xxx",
            Role::Retry => "xxy",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Primary => write!(f, "primary"),
            Role::Retry => write!(f, "retry"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("consumer group list must contain at least one entry")]
    EmptyGroupList,

    #[error("no topic matches the {role} fragment \"{fragment}\"")]
    MissingTopic { role: Role, fragment: &'static str },

    #[error("{count} topics match the {role} fragment \"{fragment}\", exactly one is required")]
    AmbiguousTopic {
        role: Role,
        fragment: &'static str,
        count: usize,
    },
}

/// Group id and topic a role resolved to.
#[derive(Debug, Clone)]
pub struct RoleBinding {
    pub group_id: String,
    pub topic: String,
}

/// Per-role bindings, resolved once at startup.
#[derive(Debug, Clone)]
pub struct RoleTable {
    primary: RoleBinding,
    retry: RoleBinding,
}

impl RoleTable {
    pub fn binding(&self, role: Role) -> &RoleBinding {
        match role {
            Role::Primary => &self.primary,
            Role::Retry => &self.retry,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KafkaSettings {
    pub brokers: String,
    /// Primary role binds the first entry, retry the last. A single entry is
    /// shared by both roles.
    pub group_ids: Vec<String>,
    /// Must contain exactly one name per role fragment.
    pub topics: Vec<String>,
    #[serde(default)]
    pub consumer: ConsumerTuning,
    #[serde(default)]
    pub producer: ProducerTuning,
}

/// Knobs passed through verbatim to the consumer client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerTuning {
    pub auto_offset_reset: String,
    pub enable_partition_eof: bool,
    pub session_timeout_ms: u32,
}

impl Default for ConsumerTuning {
    fn default() -> Self {
        Self {
            auto_offset_reset: "earliest".to_string(),
            enable_partition_eof: true,
            session_timeout_ms: 50_000,
        }
    }
}

/// Knobs passed through verbatim to the producer client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProducerTuning {
    pub acks: String,
    pub enable_idempotence: bool,
    pub message_send_max_retries: u32,
    pub retry_backoff_ms: u32,
    pub reconnect_backoff_ms: u32,
    pub reconnect_backoff_max_ms: u32,
    pub message_timeout_ms: u32,
}

impl Default for ProducerTuning {
    fn default() -> Self {
        Self {
            acks: "all".to_string(),
            enable_idempotence: true,
            message_send_max_retries: 10,
            retry_backoff_ms: 300,
            reconnect_backoff_ms: 300,
            reconnect_backoff_max_ms: 30_000,
            message_timeout_ms: 5_000,
        }
    }
}

impl Default for KafkaSettings {
    fn default() -> Self {
        Self {
            brokers: "127.0.0.1:9092".to_string(),
            group_ids: vec!["kafka-relay".to_string()],
            topics: vec!["relay.xxx.v1".to_string(), "relay.xxy.v1".to_string()],
            consumer: ConsumerTuning::default(),
            producer: ProducerTuning::default(),
        }
    }
}

impl KafkaSettings {
    /// Resolve the topic/group lists into per-role bindings.
    ///
    /// Fails when the group list is empty or when a role's fragment does not
    /// match exactly one topic name.
    pub fn resolve_roles(&self) -> Result<RoleTable, ConfigError> {
        let primary_group = self
            .group_ids
            .first()
            .ok_or(ConfigError::EmptyGroupList)?
            .clone();
        let retry_group = self
            .group_ids
            .last()
            .ok_or(ConfigError::EmptyGroupList)?
            .clone();

        Ok(RoleTable {
            primary: RoleBinding {
                group_id: primary_group,
                topic: self.topic_for(Role::Primary)?,
            },
            retry: RoleBinding {
                group_id: retry_group,
                topic: self.topic_for(Role::Retry)?,
            },
        })
    }

    fn topic_for(&self, role: Role) -> Result<String, ConfigError> {
        let fragment = role.topic_fragment();
        let matches: Vec<&String> = self
            .topics
            .iter()
            .filter(|topic| topic.contains(fragment))
            .collect();

        match matches.as_slice() {
            [] => Err(ConfigError::MissingTopic { role, fragment }),
            [topic] => Ok((*topic).clone()),
            many => Err(ConfigError::AmbiguousTopic {
                role,
                fragment,
                count: many.len(),
            }),
        }
    }

    /// Client configuration for a consumer bound to `group_id`.
    ///
    /// Offsets are always committed manually; auto-commit stays off.
    pub fn consumer_client_config(&self, group_id: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "true")
            .set("auto.offset.reset", &self.consumer.auto_offset_reset)
            .set(
                "enable.partition.eof",
                self.consumer.enable_partition_eof.to_string(),
            )
            .set(
                "session.timeout.ms",
                self.consumer.session_timeout_ms.to_string(),
            );
        config
    }

    /// Client configuration for the process-wide producer.
    pub fn producer_client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("acks", &self.producer.acks)
            .set(
                "enable.idempotence",
                self.producer.enable_idempotence.to_string(),
            )
            .set(
                "message.send.max.retries",
                self.producer.message_send_max_retries.to_string(),
            )
            .set(
                "retry.backoff.ms",
                self.producer.retry_backoff_ms.to_string(),
            )
            .set(
                "reconnect.backoff.ms",
                self.producer.reconnect_backoff_ms.to_string(),
            )
            .set(
                "reconnect.backoff.max.ms",
                self.producer.reconnect_backoff_max_ms.to_string(),
            )
            .set(
                "message.timeout.ms",
                self.producer.message_timeout_ms.to_string(),
            );
        config
    }
}
