use crate::db::CrmStorage;
use crate::error::CrmError;
use crate::service::lead_distro::{DistroMode, select_agent};
use chrono::Utc;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tracing::{debug, info, warn};

/// Messages handled by the lead distribution actor.
#[derive(Debug)]
pub enum DistroMessage {
    /// Pick the next agent (configured mode unless overridden) and record the pick.
    Assign(Option<DistroMode>, RpcReplyPort<Result<i64, CrmError>>),
}

/// Handle for interacting with the lead distribution actor.
#[derive(Clone)]
pub struct DistroHandle {
    actor: ActorRef<DistroMessage>,
}

impl DistroHandle {
    pub async fn next_agent(&self, mode: Option<DistroMode>) -> Result<i64, CrmError> {
        ractor::call!(self.actor, DistroMessage::Assign, mode)
            .map_err(|e| CrmError::Queue(format!("lead distro RPC failed: {e}")))?
    }
}

struct DistroState {
    storage: CrmStorage,
    mode: DistroMode,
    /// Last agent picked in round-robin order.
    cursor: Option<i64>,
}

/// Serializes agent selection so concurrent assignments never share a cursor.
struct DistroActor;

#[ractor::async_trait]
impl Actor for DistroActor {
    type Msg = DistroMessage;
    type State = DistroState;
    type Arguments = (CrmStorage, DistroMode);

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        (storage, mode): Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let agents = storage
            .list_sales_agents()
            .await
            .map_err(|e| ActorProcessingErr::from(format!("DB load sales agents failed: {}", e)))?;

        let cursor = agents
            .iter()
            .filter(|a| a.last_assigned_at.is_some())
            .max_by_key(|a| a.last_assigned_at)
            .map(|a| a.user_id);

        info!(
            ?mode,
            agents = agents.len(),
            ?cursor,
            "lead distribution actor started"
        );
        Ok(DistroState {
            storage,
            mode,
            cursor,
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            DistroMessage::Assign(mode, reply) => {
                let mode = mode.unwrap_or(state.mode);
                let result = self.assign(state, mode).await;
                if let Err(e) = &result {
                    warn!(?mode, error = %e, "lead distribution failed");
                }
                let _ = reply.send(result);
            }
        }
        Ok(())
    }
}

impl DistroActor {
    async fn assign(&self, state: &mut DistroState, mode: DistroMode) -> Result<i64, CrmError> {
        let agents = state.storage.list_sales_agents().await?;
        let user_id = select_agent(mode, &agents, state.cursor)
            .ok_or_else(|| CrmError::Conflict("no active sales agent".to_string()))?;

        state.storage.record_assignment(user_id, Utc::now()).await?;
        if mode == DistroMode::RoundRobin {
            state.cursor = Some(user_id);
        }
        debug!(?mode, user_id, "lead distributed");
        Ok(user_id)
    }
}

/// Spawn the lead distribution actor and return a handle.
pub async fn spawn(storage: CrmStorage, mode: DistroMode) -> Result<DistroHandle, CrmError> {
    let (actor, _jh) = Actor::spawn(None, DistroActor, (storage, mode))
        .await
        .map_err(|e| CrmError::Queue(format!("failed to spawn lead distro actor: {e}")))?;
    Ok(DistroHandle { actor })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn round_robin_cycles_through_agents() {
        let storage = CrmStorage::connect("sqlite::memory:").await.unwrap();
        let mut ids = Vec::new();
        for name in ["a", "b", "c"] {
            let user = storage
                .create_user(name, &format!("{name}@example.com"), None, "sales_agent", Decimal::ZERO)
                .await
                .unwrap();
            storage.upsert_sales_agent(user.id, 100, 1, true).await.unwrap();
            ids.push(user.id);
        }

        let handle = spawn(storage.clone(), DistroMode::RoundRobin).await.unwrap();
        let mut picks = Vec::new();
        for _ in 0..4 {
            picks.push(handle.next_agent(None).await.unwrap());
        }
        assert_eq!(picks, vec![ids[0], ids[1], ids[2], ids[0]]);

        let agents = storage.list_sales_agents().await.unwrap();
        assert_eq!(agents[0].assigned_count, 2);
        assert!(agents.iter().all(|a| a.last_assigned_at.is_some()));
    }

    #[tokio::test]
    async fn no_agents_is_a_conflict() {
        let storage = CrmStorage::connect("sqlite::memory:").await.unwrap();
        let handle = spawn(storage, DistroMode::Priority).await.unwrap();
        assert!(matches!(
            handle.next_agent(None).await,
            Err(CrmError::Conflict(_))
        ));
    }
}
