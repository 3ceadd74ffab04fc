//! Newsroom
//!
//! Wires a full cast of agents, the phase controller and a store together
//! for one article. Drafting is simulated: each required drafter saves a
//! memo built from its persona and reports completion; everything after
//! that (planning, peer review, aggregation) runs for real on the bus.

use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::{
    Agent, AgentCapabilities, AgentConfig, AgentRole, FocusReflector, Reflector, REQUIRED_DRAFTERS,
};
use crate::pubsub::{MessageBus, Payload};
use crate::store::{ArticleRun, ArticleStore, MemoRecord};
use crate::workflow::{PhaseController, WorkflowConfig, WorkflowError};

pub struct Newsroom {
    bus: Arc<MessageBus>,
    store: Arc<dyn ArticleStore>,
    config: WorkflowConfig,
    agents: Vec<AgentConfig>,
    reflector: Arc<dyn Reflector>,
}

impl Newsroom {
    /// Every persona with its default settings
    pub fn new(bus: Arc<MessageBus>, store: Arc<dyn ArticleStore>, config: WorkflowConfig) -> Self {
        Self {
            bus,
            store,
            config,
            agents: AgentRole::ALL.iter().map(|role| AgentConfig::for_role(*role)).collect(),
            reflector: Arc::new(FocusReflector),
        }
    }

    /// Replace the settings of the agents with the same name
    pub fn with_agent(mut self, config: AgentConfig) -> Self {
        match self.agents.iter_mut().find(|a| a.name == config.name) {
            Some(existing) => *existing = config,
            None => self.agents.push(config),
        }
        self
    }

    pub fn with_reflector(mut self, reflector: Arc<dyn Reflector>) -> Self {
        self.reflector = reflector;
        self
    }

    /// Run one article end to end and return its final record
    pub async fn run_article(&self, topic: &str) -> Result<ArticleRun, WorkflowError> {
        let article_id = Uuid::new_v4();
        info!("Article {} on \"{}\"", article_id, topic);

        let agents: Vec<Arc<Agent>> = self
            .agents
            .iter()
            .map(|config| {
                Arc::new(Agent::new(
                    config.clone(),
                    article_id,
                    Arc::clone(&self.bus),
                    Arc::clone(&self.reflector),
                ))
            })
            .collect();
        let Some(editor) = agents.iter().find(|a| a.config().role == AgentRole::Editor) else {
            return Err(WorkflowError::MissingAgent(AgentRole::Editor.agent_name().to_string()));
        };

        let loops: Vec<_> = agents.iter().map(|agent| agent.spawn()).collect();
        let controller = PhaseController::new(
            article_id,
            Arc::clone(&self.bus),
            Arc::clone(&self.store),
            Arc::clone(editor) as Arc<dyn AgentCapabilities>,
        )
        .with_config(self.config.clone());

        if let Err(e) = self.draft(article_id, topic, &agents).await {
            self.bus.unsubscribe(article_id, None);
            return Err(e);
        }

        let run = controller.run().await?;

        // The controller released the article's subscriptions; loops drain and exit
        for handle in loops {
            if let Err(e) = handle.await {
                warn!("Agent loop ended abnormally: {}", e);
            }
        }

        Ok(run)
    }

    /// Save one memo per required drafter and report each drafter complete
    async fn draft(&self, article_id: Uuid, topic: &str, agents: &[Arc<Agent>]) -> Result<(), WorkflowError> {
        for role in REQUIRED_DRAFTERS {
            let Some(agent) = agents.iter().find(|a| a.config().role == role) else {
                warn!("No {} agent in this newsroom", role);
                continue;
            };
            let memo = MemoRecord::new(article_id, &agent.config().name, &draft_memo(role, topic));
            self.store.save_memo(&memo).await?;

            let mut progress = Payload::new();
            progress.insert("stage".into(), json!("drafting"));
            agent.publish_progress(progress).await;

            let mut done = Payload::new();
            done.insert("memo_id".into(), json!(memo.id.to_string()));
            done.insert("words".into(), json!(memo.content.split_whitespace().count()));
            agent.publish_completion(done).await;
        }
        Ok(())
    }
}

/// Placeholder memo text for a drafter
fn draft_memo(role: AgentRole, topic: &str) -> String {
    match role {
        AgentRole::Researcher => format!(
            "Key facts on {}: three primary sources, two official datasets, one open question on methodology.",
            topic
        ),
        AgentRole::Writer => format!(
            "Draft lede for {}: what changes for readers this year, followed by the numbers that matter.",
            topic
        ),
        AgentRole::Historian => format!(
            "Precedents for {}: comparable measures in the 1930s and 1970s and how they unwound.",
            topic
        ),
        AgentRole::PoliticsLeft => format!(
            "A progressive reading of {}: distributional effects on low-income households.",
            topic
        ),
        AgentRole::PoliticsRight => format!(
            "A conservative reading of {}: costs to business and the case for market alternatives.",
            topic
        ),
        AgentRole::Geopolitics => format!(
            "Cross-border angle on {}: trading partners, likely retaliation, alliance politics.",
            topic
        ),
        AgentRole::Editor | AgentRole::GraphicArtist => format!("Notes on {}.", topic),
    }
}
