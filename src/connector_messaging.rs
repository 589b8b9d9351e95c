//! Live messaging connector and its per-channel sync state machine.
//!
//! Channels are processed strictly sequentially. Each channel is swept in
//! one of two modes, tracked in its persisted [`ChannelState`]:
//!
//! - **initial**: history is requested bounded above by the stored
//!   `oldest` cursor (unbounded on the very first run), sweeping backward
//!   from the most recent unseen point toward the channel's start. As
//!   documents are produced, `oldest` advances to each message's own
//!   cursor and `latest` is pinned to the first message seen.
//! - **incremental**: history is requested bounded below by the stored
//!   `latest` cursor, sweeping forward; `latest` moves to the newest
//!   cursor observed this run.
//!
//! The initial→incremental flip happens unconditionally when a channel's
//! sweep completes, even with zero new messages, and persists thereafter.
//!
//! Thread replies are captured whole the first time any member of the
//! thread is seen in a sweep; later members are skipped via a per-sweep
//! seen set. System-event subtypes are filtered out, and documents whose
//! sections carry no text at all are suppressed.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::checkpoint::{CheckpointStore, MESSAGING_STATE_KEY};
use crate::config::MessagingConnectorConfig;
use crate::error::ConnectorError;
use crate::messaging::{
    filter_channels, message_link, HttpMessagingClient, MessagingClient, UserResolver,
};
use crate::models::{
    Channel, ChannelState, Document, DocumentSource, Message, Section, WorkspaceState,
};
use crate::traits::Connector;

/// Environment variable the credential is read from when the connector is
/// built by the config-driven factory.
pub const TOKEN_ENV_VAR: &str = "MESSAGING_BOT_TOKEN";

/// System/administrative event subtypes excluded from documents.
const FILTERED_SUBTYPES: &[&str] = &[
    "channel_join",
    "channel_leave",
    "channel_archive",
    "channel_unarchive",
    "pinned_item",
    "unpinned_item",
    "ekm_access_denied",
    "channel_posting_permissions",
    "group_join",
    "group_leave",
    "group_archive",
    "group_unarchive",
];

pub(crate) fn is_system_event(message: &Message) -> bool {
    message
        .subtype
        .as_deref()
        .is_some_and(|s| FILTERED_SUBTYPES.contains(&s))
}

pub struct MessagingConnector {
    workspace: String,
    channel_filter: Option<Vec<String>>,
    api_base: String,
    client: Option<Arc<dyn MessagingClient>>,
    state: WorkspaceState,
    run: Option<RunState>,
}

/// Working state for one run: the remaining channel queue, the sweep in
/// progress, and the per-run user-mention cache.
struct RunState {
    queue: VecDeque<Channel>,
    current: Option<ChannelSweep>,
    users: UserResolver,
}

/// In-progress sweep of a single channel.
struct ChannelSweep {
    channel: Channel,
    initial: bool,
    /// History request bounds, fixed for the whole sweep.
    oldest_bound: Option<String>,
    latest_bound: Option<String>,
    page_cursor: Option<String>,
    exhausted_pages: bool,
    pending: VecDeque<Message>,
    seen_threads: HashSet<String>,
    /// Cursor of the first message observed in this sweep (the newest).
    latest_ts: Option<String>,
    docs_pulled: usize,
}

impl MessagingConnector {
    /// Build without credentials; driving the connector before
    /// [`load_credentials`](Self::load_credentials) (or
    /// [`with_client`](Self::with_client)) fails with
    /// [`ConnectorError::MissingCredential`].
    pub fn new(config: &MessagingConnectorConfig) -> Self {
        Self {
            workspace: config.workspace.clone(),
            channel_filter: config.channels.clone(),
            api_base: config.api_base.clone(),
            client: None,
            state: WorkspaceState::new(),
            run: None,
        }
    }

    /// Build with an already-constructed client (tests inject mocks here).
    pub fn with_client(
        config: &MessagingConnectorConfig,
        client: Arc<dyn MessagingClient>,
    ) -> Self {
        let mut connector = Self::new(config);
        connector.client = Some(client);
        connector
    }

    pub fn load_credentials(&mut self, token: &str) {
        self.client = Some(Arc::new(HttpMessagingClient::new(&self.api_base, token)));
    }

    /// List channels, preferring private ones; a source-API failure on the
    /// private-scope listing silently downgrades to public-only.
    async fn list_with_fallback(client: &dyn MessagingClient) -> Result<Vec<Channel>> {
        match client.list_channels(true).await {
            Ok(channels) => Ok(channels),
            Err(err) => match err.downcast_ref::<ConnectorError>() {
                Some(ConnectorError::SourceApi { .. }) => {
                    info!(%err, "unable to list private channels, retrying public only");
                    client.list_channels(false).await
                }
                _ => Err(err),
            },
        }
    }

    async fn init_run(&self, client: &Arc<dyn MessagingClient>) -> Result<RunState> {
        let all_channels = Self::list_with_fallback(client.as_ref()).await?;
        let selected = filter_channels(&all_channels, self.channel_filter.as_deref())?;
        info!(channels = selected.len(), "starting messaging run");
        Ok(RunState {
            queue: selected.into_iter().collect(),
            current: None,
            users: UserResolver::new(client.clone()),
        })
    }
}

async fn start_sweep(
    channel: Channel,
    client: &dyn MessagingClient,
    state: &mut WorkspaceState,
) -> Result<ChannelSweep> {
    let channel_state = state
        .entry(channel.id.clone())
        .or_insert_with(|| ChannelState::new(&channel.name));
    let initial = channel_state.initial;

    // Initial mode sweeps backward from the oldest point already seen;
    // incremental mode sweeps forward from the newest.
    let (oldest_bound, latest_bound) = if initial {
        (None, channel_state.oldest.clone())
    } else {
        (channel_state.latest.clone(), None)
    };

    info!(
        channel = %channel.name,
        mode = if initial { "initial" } else { "incremental" },
        oldest = ?oldest_bound,
        latest = ?latest_bound,
        "starting channel sweep"
    );

    if !channel.is_member {
        client.join_channel(&channel.id).await?;
        info!(channel = %channel.name, "joined channel");
    }

    Ok(ChannelSweep {
        channel,
        initial,
        oldest_bound,
        latest_bound,
        page_cursor: None,
        exhausted_pages: false,
        pending: VecDeque::new(),
        seen_threads: HashSet::new(),
        latest_ts: None,
        docs_pulled: 0,
    })
}

async fn process_message(
    workspace: &str,
    client: &dyn MessagingClient,
    users: &mut UserResolver,
    channel_state: &mut ChannelState,
    sweep: &mut ChannelSweep,
    message: Message,
) -> Result<Option<Document>> {
    if sweep.latest_ts.is_none() {
        sweep.latest_ts = Some(message.ts.clone());
    }

    let thread: Vec<Message> = match &message.thread_ts {
        Some(root_ts) => {
            // A thread is captured whole the first time any of its
            // messages appears in the history; later siblings are skipped.
            if !sweep.seen_threads.insert(root_ts.clone()) {
                debug!(channel = %sweep.channel.name, root_ts, "thread already captured");
                return Ok(None);
            }
            let replies = client.thread_replies(&sweep.channel.id, root_ts).await?;
            replies.into_iter().filter(|m| !is_system_event(m)).collect()
        }
        None if !is_system_event(&message) => vec![message.clone()],
        None => Vec::new(),
    };

    if thread.is_empty() {
        return Ok(None);
    }

    let mut sections = Vec::with_capacity(thread.len());
    for m in &thread {
        sections.push(Section {
            link: message_link(workspace, &sweep.channel.id, &m.ts),
            text: users.expand_mentions(&m.text).await,
        });
    }

    let doc = Document {
        id: format!("{}__{}", sweep.channel.id, thread[0].ts),
        sections,
        source: DocumentSource::Messaging,
        semantic_identifier: sweep.channel.name.clone(),
        metadata: serde_json::Map::new(),
    };
    sweep.docs_pulled += 1;

    if sweep.initial {
        channel_state.oldest = Some(message.ts.clone());
        if channel_state.latest.is_none() {
            channel_state.latest = Some(message.ts.clone());
        }
    } else {
        channel_state.latest = sweep.latest_ts.clone();
    }

    // Documents with no text at all (e.g. attachment-only messages) are
    // suppressed; the cursor advancement above still counts.
    if doc.total_text_len() == 0 {
        return Ok(None);
    }
    Ok(Some(doc))
}

async fn pull(
    workspace: &str,
    client: &Arc<dyn MessagingClient>,
    state: &mut WorkspaceState,
    run: &mut RunState,
) -> Result<Option<Document>> {
    loop {
        let mut sweep = match run.current.take() {
            Some(sweep) => sweep,
            None => match run.queue.pop_front() {
                Some(channel) => start_sweep(channel, client.as_ref(), state).await?,
                None => return Ok(None),
            },
        };

        if let Some(message) = sweep.pending.pop_front() {
            let channel_state = state
                .get_mut(&sweep.channel.id)
                .ok_or_else(|| anyhow!("no sync state for channel {}", sweep.channel.id))?;
            let doc = process_message(
                workspace,
                client.as_ref(),
                &mut run.users,
                channel_state,
                &mut sweep,
                message,
            )
            .await?;
            run.current = Some(sweep);
            if doc.is_some() {
                return Ok(doc);
            }
            continue;
        }

        if !sweep.exhausted_pages {
            let page = client
                .history_page(
                    &sweep.channel.id,
                    sweep.oldest_bound.as_deref(),
                    sweep.latest_bound.as_deref(),
                    sweep.page_cursor.as_deref(),
                )
                .await?;
            sweep.exhausted_pages = page.next_cursor.is_none();
            sweep.page_cursor = page.next_cursor;
            sweep.pending.extend(page.messages);
            run.current = Some(sweep);
            continue;
        }

        // Sweep complete: the flip to incremental is unconditional, even
        // for channels that produced nothing this run.
        if let Some(channel_state) = state.get_mut(&sweep.channel.id) {
            channel_state.initial = false;
        }
        info!(
            channel = %sweep.channel.name,
            documents = sweep.docs_pulled,
            "finished channel sweep"
        );
    }
}

#[async_trait]
impl Connector for MessagingConnector {
    fn source(&self) -> DocumentSource {
        DocumentSource::Messaging
    }

    async fn load_state(&mut self, store: &dyn CheckpointStore) -> Result<()> {
        self.state = match store.load(MESSAGING_STATE_KEY).await? {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| anyhow!("corrupt messaging connector checkpoint: {e}"))?,
            None => WorkspaceState::new(),
        };
        debug!(channels = self.state.len(), "loaded messaging checkpoint");
        Ok(())
    }

    async fn save_state(&mut self, store: &dyn CheckpointStore) -> Result<()> {
        let value: Value = serde_json::to_value(&self.state)?;
        store.store(MESSAGING_STATE_KEY, &value).await
    }

    async fn next_document(&mut self) -> Result<Option<Document>> {
        let client = self
            .client
            .clone()
            .ok_or(ConnectorError::MissingCredential {
                connector: "messaging",
            })?;

        if self.run.is_none() {
            self.run = Some(self.init_run(&client).await?);
        }

        match self.run.as_mut() {
            Some(run) => pull(&self.workspace, &client, &mut self.state, run).await,
            None => Ok(None),
        }
    }
}
