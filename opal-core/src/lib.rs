//! Opal Core - building blocks for the Opal object-storage peer control plane
//!
//! This crate carries everything the peer RPC surface needs that is not tied
//! to a running node: the wire codecs, the in-process publish/subscribe
//! fabric, the S3 notification event model, trace and console log records,
//! the audit entry projection, the bucket lifecycle document model and
//! KMS-backed stream encryption for configuration at rest.

pub mod audit;
pub mod codec;
pub mod console;
pub mod crypto;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod pubsub;
pub mod trace;

pub use audit::AuditEntry;
pub use codec::{Codec, CompactCodec, GeneralCodec};
pub use console::{LogLevel, LogRecord};
pub use crypto::{Context, Kms, LocalKms};
pub use error::{CodecError, CryptoError, EventError, LifecycleError};
pub use event::{Event, EventName, RulesMap, TargetId};
pub use lifecycle::LifecycleConfiguration;
pub use pubsub::{Publisher, SubscriptionHandle, SUBSCRIBER_BUFFER};
pub use trace::{TraceEntry, TraceOpts};
