//! Taskdeck Core - Entity Types
//!
//! Pure data structures shared by the synchronization layer and its test
//! utilities: identifiers, domain entities, the response envelope, the error
//! taxonomy, cache tags and the transport seam. No I/O lives here.

pub mod entities;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod tag;
pub mod transport;

pub use entities::*;
pub use envelope::{Envelope, PageInfo, Payload};
pub use error::{
    ApiFailure, ApiResult, StatusClass, FALLBACK_ERROR_MESSAGE, NOT_FOUND_MESSAGE,
    PERMISSION_DENIED_MESSAGE, SERVER_ERROR_MESSAGE,
};
pub use identity::{
    new_local_id, ActivityId, Clock, CommentId, DurationMs, EntityIdType, ProjectId, SystemClock,
    TaskId, Timestamp, UserId,
};
pub use tag::{Tag, TagKind};
pub use transport::{ApiRequest, HttpMethod, Transport, TransportError, TransportResponse};
