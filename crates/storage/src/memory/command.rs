//! In-memory `CommandProposalRepository`.

use crate::repo::{apply_transition, CommandProposalRepository, ProposalTransition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roast_schema::{AuditEntry, CommandProposal, CommandType, ProposalId, ProposalStatus, SessionId};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct InMemoryCommandProposalRepository {
    proposals: Mutex<HashMap<ProposalId, CommandProposal>>,
}

impl InMemoryCommandProposalRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CommandProposalRepository for InMemoryCommandProposalRepository {
    async fn create(&self, proposal: CommandProposal) -> anyhow::Result<CommandProposal> {
        let mut proposals = self.proposals.lock().unwrap();
        proposals.insert(proposal.proposal_id, proposal.clone());
        Ok(proposal)
    }

    async fn get(&self, id: ProposalId) -> anyhow::Result<Option<CommandProposal>> {
        Ok(self.proposals.lock().unwrap().get(&id).cloned())
    }

    async fn transition(
        &self,
        id: ProposalId,
        expected: ProposalStatus,
        apply: ProposalTransition,
        audit_entry: AuditEntry,
    ) -> anyhow::Result<Option<Result<CommandProposal, ProposalStatus>>> {
        let mut proposals = self.proposals.lock().unwrap();
        let Some(proposal) = proposals.get_mut(&id) else { return Ok(None) };

        if proposal.status != expected {
            return Ok(Some(Err(proposal.status)));
        }

        apply_transition(proposal, apply);
        proposal.audit_log.push(audit_entry);
        Ok(Some(Ok(proposal.clone())))
    }

    async fn list_pending_approvals(&self) -> anyhow::Result<Vec<CommandProposal>> {
        let proposals = self.proposals.lock().unwrap();
        let mut out: Vec<_> = proposals
            .values()
            .filter(|p| p.status == ProposalStatus::PendingApproval)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn list_by_machine(&self, machine_id: &str) -> anyhow::Result<Vec<CommandProposal>> {
        let proposals = self.proposals.lock().unwrap();
        let mut out: Vec<_> = proposals
            .values()
            .filter(|p| p.command.machine_id == machine_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn list_by_session(&self, session_id: SessionId) -> anyhow::Result<Vec<CommandProposal>> {
        let proposals = self.proposals.lock().unwrap();
        let mut out: Vec<_> = proposals
            .values()
            .filter(|p| p.session_id == Some(session_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn sweep_timeouts(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<CommandProposal>> {
        let mut proposals = self.proposals.lock().unwrap();
        let mut timed_out = Vec::new();
        for proposal in proposals.values_mut() {
            if proposal.status == ProposalStatus::PendingApproval {
                let deadline = proposal.created_at + chrono::Duration::seconds(proposal.approval_timeout_seconds);
                if now >= deadline {
                    proposal.status = ProposalStatus::Timeout;
                    proposal.audit_log.push(AuditEntry {
                        timestamp: now,
                        event: "TIMEOUT".to_string(),
                        actor: "system".to_string(),
                        details: serde_json::json!({}),
                    });
                    timed_out.push(proposal.clone());
                }
            }
        }
        Ok(timed_out)
    }

    async fn recent_commands(
        &self,
        machine_id: &str,
        command_type: CommandType,
        limit: usize,
    ) -> anyhow::Result<Vec<CommandProposal>> {
        let proposals = self.proposals.lock().unwrap();
        let mut out: Vec<_> = proposals
            .values()
            .filter(|p| p.command.machine_id == machine_id && p.command.command_type == command_type)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        Ok(out)
    }
}
