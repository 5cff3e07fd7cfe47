//! Batched room provisioning.
//!
//! All rooms for a run are created with one request. The call is atomic from
//! the run's point of view: it either yields every descriptor or fails the
//! run, and it is never retried.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;

use crate::error::ProvisionError;
use crate::job::RoomDescriptor;

/// Parameters of the single batch room-create call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomBatchRequest {
    pub prefix: String,
    pub count: usize,
    pub ttl: Duration,
}

impl RoomBatchRequest {
    /// `{prefix}-0` through `{prefix}-(count-1)`.
    pub fn room_names(&self) -> Vec<String> {
        (0..self.count)
            .map(|index| format!("{}-{index}", self.prefix))
            .collect()
    }

    /// Expiry shared by every room in the batch.
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// The remote batch room-create API.
#[async_trait]
pub trait RoomProvisioner: Send + Sync {
    async fn create_rooms(
        &self,
        request: &RoomBatchRequest,
    ) -> Result<Vec<RoomDescriptor>, ProvisionError>;
}

/// Creates `count` rooms in one call and checks that the response describes
/// exactly the rooms that were asked for, in order.
pub async fn create_rooms(
    provisioner: &dyn RoomProvisioner,
    count: usize,
    prefix: &str,
    ttl: Duration,
) -> Result<Vec<RoomDescriptor>, ProvisionError> {
    let request = RoomBatchRequest {
        prefix: prefix.to_string(),
        count,
        ttl,
    };
    if count == 0 {
        return Ok(Vec::new());
    }

    tracing::info!(count, prefix, "creating rooms via batch API");
    let rooms = provisioner.create_rooms(&request).await?;
    check_batch(&request, &rooms)?;
    tracing::info!(count = rooms.len(), "rooms created");
    Ok(rooms)
}

fn check_batch(request: &RoomBatchRequest, rooms: &[RoomDescriptor]) -> Result<(), ProvisionError> {
    if rooms.len() != request.count {
        return Err(ProvisionError::CountMismatch {
            requested: request.count,
            returned: rooms.len(),
        });
    }
    let mut seen = HashSet::with_capacity(rooms.len());
    for room in rooms {
        if !seen.insert(room.name.as_str()) {
            return Err(ProvisionError::DuplicateName(room.name.clone()));
        }
    }
    for (index, (room, expected)) in rooms.iter().zip(request.room_names()).enumerate() {
        if room.name != expected {
            return Err(ProvisionError::UnexpectedName {
                index,
                expected,
                returned: room.name.clone(),
            });
        }
    }
    Ok(())
}
