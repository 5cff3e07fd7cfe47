//! The control-plane call that starts one agent in one room.

use async_trait::async_trait;

use crate::error::StartAgentError;
use crate::job::RoomDescriptor;

/// Acknowledgement from the control plane that an agent was started or queued.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentStarted {
    pub session_id: Option<String>,
}

/// The remote agent-start API.
///
/// Implementations report rate limiting, transient transport problems and
/// permanent rejections through [`StartAgentError`]; the dispatcher decides
/// what to do with each.
#[async_trait]
pub trait AgentStarter: Send + Sync {
    async fn start_agent(
        &self,
        room: &RoomDescriptor,
        agent_name: &str,
    ) -> Result<AgentStarted, StartAgentError>;
}
