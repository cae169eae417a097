use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tracing::{info, warn};

use hollowbrook_domain::AgentName;
use hollowbrook_llm::{Compactor, LlmProvider};

/// Executes context compaction for agent sessions.
///
/// Called by the apply-effects phase when handling a compaction request: it
/// runs the external compactor, then tells the provider the session shrank so
/// subsequent threshold decisions use the new count. Concurrent requests for
/// the same agent collapse into one.
pub struct CompactionService {
    compactor: Arc<dyn Compactor>,
    provider: Arc<dyn LlmProvider>,
    in_flight: Mutex<BTreeSet<AgentName>>,
}

impl CompactionService {
    pub fn new(compactor: Arc<dyn Compactor>, provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            compactor,
            provider,
            in_flight: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn token_count(&self, agent: &AgentName) -> u64 {
        self.provider.token_count(agent)
    }

    /// Compact an agent's session. Returns the post-compaction token count;
    /// on failure the pre-compaction count is returned and the tick proceeds.
    pub async fn execute_compact(&self, agent: &AgentName, critical: bool) -> Result<u64> {
        let pre_tokens = self.token_count(agent);
        {
            let mut in_flight = self.in_flight.lock().expect("compaction set poisoned");
            if !in_flight.insert(agent.clone()) {
                warn!(agent = %agent, "agent already compacting, skipping");
                return Ok(pre_tokens);
            }
        }

        let result = self.compactor.execute_compact(agent, critical).await;

        self.in_flight
            .lock()
            .expect("compaction set poisoned")
            .remove(agent);

        match result {
            Ok(post_tokens) => {
                self.provider
                    .reset_session_after_compaction(agent, post_tokens);
                info!(
                    agent = %agent,
                    critical,
                    pre_tokens,
                    post_tokens,
                    saved = pre_tokens.saturating_sub(post_tokens),
                    "compaction complete"
                );
                Ok(post_tokens)
            }
            Err(err) => {
                warn!(agent = %agent, error = %err, "compaction failed, keeping session as-is");
                Ok(pre_tokens)
            }
        }
    }
}
