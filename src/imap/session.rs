// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Standard library imports
use std::{
    pin::Pin,
    future::Future,
    fmt::{self, Debug},
    sync::Arc,
    time::Duration,
};

// Async runtime and utilities
use async_trait::async_trait;
use futures_util::stream::TryStreamExt;
use futures_util::future::BoxFuture;
use log::{debug, error, info, warn};

// IMAP types and client
use async_imap::types::Flag;

// Local types
use crate::config::{BreakerConfig, MetricsConfig};
use crate::executor::{Breaker, ExecutorChain, MetricsSink, MonitoringExecutor, NullMetricsSink, OnceCommand};
use crate::imap::client::ImapClient;
use crate::imap::fetch::{build_fetch_command, parse_fetch_response, FetchProfile};
use crate::imap::{
    types::{FlagOperation, SearchCriteria, MailMessage},
    error::ImapError,
};

// TLS Stream types
use tokio::net::TcpStream as TokioTcpStream;
use tokio_util::compat::TokioAsyncReadCompatExt;
use tokio_native_tls;
use tokio_native_tls::native_tls;
use tokio_native_tls::TlsConnector;
use tokio::sync::Mutex as TokioMutex;

// Type aliases
pub type TlsCompatibleStream = tokio_util::compat::Compat<tokio_native_tls::TlsStream<TokioTcpStream>>;
pub type TlsImapSession = async_imap::Session<TlsCompatibleStream>;
pub type ImapSessionFactory = Box<dyn Fn() -> Pin<Box<dyn Future<Output = Result<TlsImapSession, ImapError>> + Send>> + Send + Sync>;

// Define a constant for the delimiter
pub const DEFAULT_MAILBOX_DELIMITER: &str = "/";

/// Trait defining asynchronous IMAP operations
#[async_trait]
pub trait AsyncImapOps: Send + Sync + Debug {
    /// Logs in the user with the given credentials
    async fn login(&self, username: &str, password: &str) -> Result<(), ImapError>;

    /// Logs out the current session
    async fn logout(&self) -> Result<(), ImapError>;

    /// Lists all folders in the mailbox (returns flat list of folder names for backward compatibility)
    async fn list_folders(&self) -> Result<Vec<String>, ImapError>;

    /// Lists all folders with hierarchical structure and metadata
    async fn list_folders_hierarchical(&self) -> Result<Vec<crate::imap::types::Folder>, ImapError>;

    /// Creates a new folder with the given name
    async fn create_folder(&self, name: &str) -> Result<(), ImapError>;

    /// Deletes an existing folder
    async fn delete_folder(&self, name: &str) -> Result<(), ImapError>;

    /// Renames a folder from old_name to new_name
    async fn rename_folder(&self, old_name: &str, new_name: &str) -> Result<(), ImapError>;

    /// Selects a folder for subsequent operations
    async fn select_folder(&self, name: &str) -> Result<(), ImapError>;

    /// Searches for emails matching the given criteria (string-based for backward compatibility)
    async fn search_emails(&self, criteria: &str) -> Result<Vec<u32>, ImapError>;

    /// Searches for emails using structured search criteria
    async fn search_emails_structured(&self, criteria: &SearchCriteria) -> Result<Vec<u32>, ImapError>;

    /// Fetches emails with the given UIDs, using a fixed "everything" profile.
    /// Callers that need control over which fields come back should use
    /// `fetch_with_profile` directly.
    async fn fetch_emails(&self, uids: &[u32]) -> Result<Vec<MailMessage>, ImapError>;

    /// Builds and issues a `[UID ]FETCH` for `sequence_set` using the given
    /// `FetchProfile`, parsing every untagged response through
    /// `imap::fetch::parse_fetch_response`. This is the one real FETCH path
    /// production callers (and `fetch_emails`) go through.
    async fn fetch_with_profile(
        &self,
        folder: &str,
        sequence_set: &str,
        use_uid: bool,
        profile: &FetchProfile,
    ) -> Result<Vec<MailMessage>, ImapError>;

    /// Moves an email from one folder to another
    async fn move_email(&self, uid: u32, from_folder: &str, to_folder: &str) -> Result<(), ImapError>;

    /// Stores flags for the given email UIDs
    async fn store_flags(&self, uids: &[u32], operation: FlagOperation, flags: &[String]) -> Result<(), ImapError>;

    /// Appends an email to the specified folder
    async fn append(&self, folder: &str, content: &[u8], flags: &[String]) -> Result<(), ImapError>;

    /// Fetches the raw message content for a given UID
    async fn fetch_raw_message(&self, uid: u32) -> Result<Vec<u8>, ImapError>;

    /// Permanently removes messages marked with the \Deleted flag
    async fn expunge(&self) -> Result<(), ImapError>;

    /// Copy messages to another folder (for atomic operations)
    async fn copy_messages(&self, uids: &[u32], to_folder: &str) -> Result<(), ImapError>;

    /// Batch move messages atomically from one folder to another
    async fn move_messages(&self, uids: &[u32], from_folder: &str, to_folder: &str) -> Result<(), ImapError>;

    /// Mark messages as deleted (sets \Deleted flag)
    async fn mark_as_deleted(&self, uids: &[u32]) -> Result<(), ImapError>;

    /// Delete messages (mark as deleted and expunge)
    async fn delete_messages(&self, uids: &[u32]) -> Result<(), ImapError>;

    /// Undelete messages (removes \Deleted flag)
    async fn undelete_messages(&self, uids: &[u32]) -> Result<(), ImapError>;

    /// Send NOOP command (keeps connection alive and checks for updates)
    async fn noop(&self) -> Result<(), ImapError>;
}

// Wrapper definition using Arc<Mutex<...>>
#[derive(Clone)]
pub struct AsyncImapSessionWrapper {
    // Wrap the session in Arc<Mutex> for interior mutability
    session: Arc<TokioMutex<TlsImapSession>>,
    // Track currently selected folder for atomic operations
    current_folder: Arc<TokioMutex<Option<String>>>,
    // Timeout for APPEND operations (configurable to handle slow servers)
    append_timeout: Duration,
    // Host label commands are tagged with when routed through the monitoring executor.
    host: String,
    // Breaker chain every real IMAP command is routed through (C5/C6).
    executor: Arc<ExecutorChain>,
    metrics_config: MetricsConfig,
    metrics_sink: Arc<dyn MetricsSink>,
}

impl Debug for AsyncImapSessionWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncImapSessionWrapper")
            .field("host", &self.host)
            .field("append_timeout", &self.append_timeout)
            .finish_non_exhaustive()
    }
}

impl AsyncImapSessionWrapper {
    pub fn new(session: TlsImapSession, host: impl Into<String>) -> Self {
        Self::with_append_timeout(session, Duration::from_secs(35), host)
    }

    /// Builds a wrapper with a default, always-on breaker (`BreakerConfig::default()`
    /// always passes validation) and no metrics sink. Hosts that already run a
    /// `MailCoreRuntime` should prefer `with_collaborators` so breakers are
    /// shared per-account via `BreakerRegistry` instead of one-per-connection.
    pub fn with_append_timeout(session: TlsImapSession, append_timeout: Duration, host: impl Into<String>) -> Self {
        let executor = Arc::new(ExecutorChain::new(
            Arc::new(
                Breaker::new("session:default", BreakerConfig::default())
                    .expect("BreakerConfig::default() always passes validation"),
            ),
            None,
            None,
        ));
        Self::with_collaborators(
            session,
            append_timeout,
            host,
            executor,
            MetricsConfig::default(),
            Arc::new(NullMetricsSink),
        )
    }

    /// Builds a wrapper wired to caller-supplied breaker/metrics collaborators —
    /// the constructor a `ConnectionProvider` implementation backed by
    /// `MailCoreRuntime` should use, so every session for an account shares
    /// that account's `BreakerRegistry` entries and `MetricsSink`.
    pub fn with_collaborators(
        session: TlsImapSession,
        append_timeout: Duration,
        host: impl Into<String>,
        executor: Arc<ExecutorChain>,
        metrics_config: MetricsConfig,
        metrics_sink: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            session: Arc::new(TokioMutex::new(session)),
            current_folder: Arc::new(TokioMutex::new(None)),
            append_timeout,
            host: host.into(),
            executor,
            metrics_config,
            metrics_sink,
        }
    }

    pub async fn connect(
        server: &str,
        port: u16,
        username: Arc<String>,
        password: Arc<String>,
        append_timeout: Duration,
    ) -> Result<Self, ImapError> {
        // Create TLS connector
        let tls_builder = native_tls::TlsConnector::builder();
        let tls = tls_builder
            .build()
            .map_err(|e| ImapError::Tls(e.to_string()))?;
        let tls_connector = TlsConnector::from(tls);

        // Connect to server via TCP
        let addr = format!("{}:{}", server, port);
        let tcp_stream = TokioTcpStream::connect(&addr)
            .await
            .map_err(|e| ImapError::Connection(e.to_string()))?;

        // Set socket-level timeouts to ensure blocking I/O operations timeout
        // This is CRITICAL for IMAP APPEND operations which may block indefinitely
        info!("Setting socket timeouts: read={:?}, write={:?}", append_timeout, append_timeout);

        // Convert to std::net::TcpStream to set SO_RCVTIMEO and SO_SNDTIMEO
        let std_stream = tcp_stream.into_std()
            .map_err(|e| ImapError::Connection(format!("Failed to convert to std stream: {}", e)))?;

        std_stream.set_read_timeout(Some(append_timeout))
            .map_err(|e| ImapError::Connection(format!("Failed to set read timeout: {}", e)))?;
        std_stream.set_write_timeout(Some(append_timeout))
            .map_err(|e| ImapError::Connection(format!("Failed to set write timeout: {}", e)))?;

        // Convert back to tokio::net::TcpStream
        let tcp_stream = TokioTcpStream::from_std(std_stream)
            .map_err(|e| ImapError::Connection(format!("Failed to convert back to tokio stream: {}", e)))?;

        // Perform TLS handshake
        let tls_stream = tls_connector
            .connect(server, tcp_stream)
            .await
            .map_err(|e| ImapError::Tls(e.to_string()))?;

        // Convert to compatible stream type
        let compat_stream = tls_stream.compat();

        // Create IMAP client and login
        let client = async_imap::Client::new(compat_stream);
        let session = client
            .login(&*username, &*password)
            .await
            .map_err(|(err, _client)| {
                // Handle the error part of the Result - login returns (Error, Client) on failure
                match err {
                    async_imap::error::Error::No(msg) | async_imap::error::Error::Bad(msg) => {
                        ImapError::Auth(format!("Login failed: {}", msg))
                    }
                    _ => ImapError::Auth(format!("Login failed: {:?}", err))
                }
            })?;

        Ok(Self::with_append_timeout(session, append_timeout, server))
    }

    /// XOAUTH2 variant of `connect`, mirroring `client::connect_with_oauth`'s
    /// handshake but returning the bare wrapper (the caller constructs the
    /// `ImapClient` around it).
    pub async fn connect_with_xoauth2(
        server: &str,
        port: u16,
        username: Arc<String>,
        access_token: Arc<String>,
        append_timeout: Duration,
    ) -> Result<Self, ImapError> {
        let tls_builder = native_tls::TlsConnector::builder();
        let tls = tls_builder
            .build()
            .map_err(|e| ImapError::Tls(e.to_string()))?;
        let tls_connector = TlsConnector::from(tls);

        let addr = format!("{}:{}", server, port);
        let tcp_stream = TokioTcpStream::connect(&addr)
            .await
            .map_err(|e| ImapError::Connection(e.to_string()))?;

        let std_stream = tcp_stream.into_std()
            .map_err(|e| ImapError::Connection(format!("Failed to convert to std stream: {}", e)))?;
        std_stream.set_read_timeout(Some(append_timeout))
            .map_err(|e| ImapError::Connection(format!("Failed to set read timeout: {}", e)))?;
        std_stream.set_write_timeout(Some(append_timeout))
            .map_err(|e| ImapError::Connection(format!("Failed to set write timeout: {}", e)))?;
        let tcp_stream = TokioTcpStream::from_std(std_stream)
            .map_err(|e| ImapError::Connection(format!("Failed to convert back to tokio stream: {}", e)))?;

        let tls_stream = tls_connector
            .connect(server, tcp_stream)
            .await
            .map_err(|e| ImapError::Tls(e.to_string()))?;

        let compat_stream = tls_stream.compat();
        let client = async_imap::Client::new(compat_stream);

        let authenticator = crate::imap::xoauth2::XOAuth2Authenticator::new(username.as_str(), access_token.as_str());
        let session = client
            .authenticate("XOAUTH2", authenticator)
            .await
            .map_err(|(err, _client)| ImapError::Auth(format!("XOAUTH2 auth failed: {:?}", err)))?;

        Ok(Self::with_append_timeout(session, append_timeout, server))
    }

    /// Get the currently selected folder
    pub async fn current_folder(&self) -> Option<String> {
        let folder_guard = self.current_folder.lock().await;
        folder_guard.clone()
    }

    /// Ensure a specific folder is selected (optimization to avoid redundant SELECTs)
    pub async fn ensure_folder_selected(&self, folder: &str) -> Result<(), ImapError> {
        let current = self.current_folder().await;

        if current.as_deref() != Some(folder) {
            let session = self.session.clone();
            let folder_owned = folder.to_string();
            self.run_command("SELECT", async move {
                let mut session_guard = session.lock().await;
                session_guard.select(&folder_owned).await.map_err(ImapError::from)
            })
            .await?;

            // Update tracked state
            let mut folder_guard = self.current_folder.lock().await;
            *folder_guard = Some(folder.to_string());
        }

        Ok(())
    }

    /// Routes a single IMAP wire call through the breaker chain and latency
    /// monitor. `future` must already be an owned, `'static` future (built
    /// from cloned `Arc` fields, never borrowing `&self`) since `OnceCommand`
    /// cannot hold a borrow.
    async fn run_command<Output, Fut>(&self, name: &'static str, future: Fut) -> Result<Output, ImapError>
    where
        Fut: Future<Output = Result<Output, ImapError>> + Send + 'static,
        Output: Send + 'static,
    {
        let command = OnceCommand::new(name, future);
        let monitored = MonitoringExecutor::new(
            command,
            self.metrics_config.clone(),
            self.host.clone(),
            self.metrics_sink.clone(),
        );
        self.executor.run(&monitored).await
    }
}

#[async_trait]
impl AsyncImapOps for AsyncImapSessionWrapper {
    // Acquire lock in each method before calling the inner session method
    async fn login(&self, _username: &str, _password: &str) -> Result<(), ImapError> {
        // Login is already done during connect, so this is a no-op
        // The session is already authenticated
        Ok(())
    }

    async fn logout(&self) -> Result<(), ImapError> {
        let session = self.session.clone();
        self.run_command("LOGOUT", async move {
            let mut session_guard = session.lock().await;
            session_guard.logout().await.map_err(ImapError::from)
        })
        .await
    }

    async fn list_folders(&self) -> Result<Vec<String>, ImapError> {
        let session = self.session.clone();
        self.run_command("LIST", async move {
            let mut session_guard = session.lock().await;
            // Use the IMAP LIST command to get all folders
            let mut folders_stream = session_guard
                .list(None, Some("*"))
                .await
                .map_err(ImapError::from)?;

            let mut folder_names = Vec::new();
            while let Some(folder_result) = folders_stream.try_next().await.map_err(ImapError::from)? {
                folder_names.push(folder_result.name().to_string());
            }

            Ok(folder_names)
        })
        .await
    }

    async fn list_folders_hierarchical(&self) -> Result<Vec<crate::imap::types::Folder>, ImapError> {
        let session = self.session.clone();
        self.run_command("LIST", async move {
            let mut session_guard = session.lock().await;

            // Use the IMAP LIST command to get all folders with detailed information
            let mut folders_stream = session_guard
                .list(None, Some("*"))
                .await
                .map_err(ImapError::from)?;

            let mut folder_data = Vec::new();

            while let Some(folder_result) = folders_stream.try_next().await.map_err(ImapError::from)? {
                let name = folder_result.name().to_string();

                // Extract delimiter - async-imap Name struct should have delimiter info
                let delimiter = folder_result.delimiter().map(|d| d.to_string());

                // Extract attributes - convert flags to string attributes
                let attributes: Vec<String> = folder_result.attributes()
                    .iter()
                    .map(|attr| format!("{:?}", attr)) // Convert attribute enum to string
                    .collect();

                folder_data.push((name, delimiter, attributes));
            }

            // Build hierarchical structure
            let hierarchy = crate::imap::types::Folder::build_hierarchy(folder_data);
            Ok(hierarchy)
        })
        .await
    }

    async fn create_folder(&self, name: &str) -> Result<(), ImapError> {
        let session = self.session.clone();
        let name = name.to_string();
        self.run_command("CREATE", async move {
            let mut session_guard = session.lock().await;
            session_guard.create(&name).await.map_err(ImapError::from)
        })
        .await
    }

    async fn delete_folder(&self, name: &str) -> Result<(), ImapError> {
        let session = self.session.clone();
        let name = name.to_string();
        self.run_command("DELETE", async move {
            let mut session_guard = session.lock().await;
            session_guard.delete(&name).await.map_err(ImapError::from)
        })
        .await
    }

    async fn rename_folder(&self, old_name: &str, new_name: &str) -> Result<(), ImapError> {
        let session = self.session.clone();
        let old_name = old_name.to_string();
        let new_name = new_name.to_string();
        self.run_command("RENAME", async move {
            let mut session_guard = session.lock().await;
            session_guard.rename(&old_name, &new_name).await.map_err(ImapError::from)
        })
        .await
    }

    async fn select_folder(&self, name: &str) -> Result<(), ImapError> {
        let session = self.session.clone();
        let name_owned = name.to_string();
        self.run_command("SELECT", async move {
            let mut session_guard = session.lock().await;
            session_guard.select(&name_owned).await.map(|_| ()).map_err(ImapError::from)
        })
        .await?;

        // Update tracked folder state
        let mut folder_guard = self.current_folder.lock().await;
        *folder_guard = Some(name.to_string());
        Ok(())
    }

    async fn search_emails(&self, criteria: &str) -> Result<Vec<u32>, ImapError> {
        let session = self.session.clone();
        let criteria = criteria.to_string();
        self.run_command("SEARCH", async move {
            let mut session_guard = session.lock().await;
            // Use UID SEARCH to get UIDs, not message sequence numbers
            // This is critical because fetch_emails uses UID FETCH
            let sequence_set = session_guard.uid_search(&criteria)
                .await
                .map_err(ImapError::from)?;
            Ok(sequence_set.into_iter().collect())
        })
        .await
    }

    async fn search_emails_structured(&self, criteria: &SearchCriteria) -> Result<Vec<u32>, ImapError> {
        // Convert structured criteria to IMAP search string
        let criteria_string = criteria.to_string();

        // Validate criteria string before sending to server
        if criteria_string.trim().is_empty() {
            return Err(ImapError::InvalidCriteria("Empty search criteria".to_string()));
        }

        debug!("Executing IMAP search with criteria: {}", criteria_string);

        let session = self.session.clone();
        let criteria_for_error = criteria_string.clone();
        let results: Vec<u32> = self
            .run_command("SEARCH", async move {
                let mut session_guard = session.lock().await;

                // Execute the search on the server using UID SEARCH
                // This is critical because fetch_emails uses UID FETCH
                let sequence_set = session_guard.uid_search(&criteria_string)
                    .await
                    .map_err(|e| {
                        error!("IMAP UID search failed for criteria '{}': {}", criteria_string, e);
                        ImapError::InvalidCriteria(format!("Search failed: {}", e))
                    })?;

                Ok(sequence_set.into_iter().collect())
            })
            .await?;

        info!("IMAP search returned {} results for criteria: {}", results.len(), criteria_for_error);
        Ok(results)
    }

    async fn fetch_emails(&self, uids: &[u32]) -> Result<Vec<MailMessage>, ImapError> {
        let folder = self.current_folder().await.unwrap_or_default();
        let sequence = uids.iter().map(|uid| uid.to_string()).collect::<Vec<_>>().join(",");
        debug!("Fetching {} UIDs: {:?}", uids.len(), uids);

        let profile = FetchProfile {
            uid: true,
            internal_date: true,
            flags: true,
            envelope: true,
            body: true,
            ..Default::default()
        };

        let messages = self.fetch_with_profile(&folder, &sequence, true, &profile).await?;
        debug!("Fetch complete: requested {} UIDs, received {} messages", uids.len(), messages.len());
        if messages.len() != uids.len() {
            warn!("UID mismatch: requested {}, received {}. Missing UIDs: {:?}",
                  uids.len(), messages.len(),
                  uids.iter().filter(|uid| !messages.iter().any(|m| m.uid == Some(**uid))).collect::<Vec<_>>());
        }
        Ok(messages)
    }

    async fn fetch_with_profile(
        &self,
        folder: &str,
        sequence_set: &str,
        use_uid: bool,
        profile: &FetchProfile,
    ) -> Result<Vec<MailMessage>, ImapError> {
        let command = build_fetch_command(sequence_set, use_uid, profile);
        debug!("Issuing {}", command);

        let session = self.session.clone();
        let folder = folder.to_string();
        let sequence_set = sequence_set.to_string();
        let items = profile.to_item_list().join(" ");
        let use_uid_owned = use_uid;

        self.run_command("FETCH", async move {
            let mut session_guard = session.lock().await;
            let mut fetch_stream = if use_uid_owned {
                session_guard.uid_fetch(&sequence_set, &items).await.map_err(ImapError::from)?
            } else {
                session_guard.fetch(&sequence_set, &items).await.map_err(ImapError::from)?
            };

            let mut messages = Vec::new();
            while let Some(fetch_result) = fetch_stream.try_next().await.map_err(ImapError::from)? {
                match parse_fetch_response(&fetch_result, &folder, 0) {
                    Ok(msg) => messages.push(msg),
                    Err(e) => warn!("skipping malformed FETCH item in folder {}: {}", folder, e),
                }
            }
            Ok(messages)
        })
        .await
    }

    async fn move_email(&self, uid: u32, from_folder: &str, to_folder: &str) -> Result<(), ImapError> {
        // Atomic move operation following IMAP best practices
        // Sequence: SELECT source → COPY to dest → STORE \Deleted → EXPUNGE
        self.ensure_folder_selected(from_folder).await?;

        let session = self.session.clone();
        let sequence = uid.to_string();
        let to_folder_owned = to_folder.to_string();

        let moved = self
            .run_command("MOVE", {
                let session = session.clone();
                let sequence = sequence.clone();
                let to_folder_owned = to_folder_owned.clone();
                async move {
                    let mut session_guard = session.lock().await;
                    match session_guard.uid_mv(&sequence, &to_folder_owned).await {
                        Ok(_) => Ok(true),
                        Err(e) => {
                            debug!("MOVE command failed, falling back to COPY+DELETE: {:?}", e);
                            Ok(false)
                        }
                    }
                }
            })
            .await?;

        if moved {
            return Ok(());
        }

        // Fallback: Traditional atomic move sequence
        self.run_command("COPY", {
            let session = session.clone();
            let sequence = sequence.clone();
            let to_folder_owned = to_folder_owned.clone();
            async move {
                let mut session_guard = session.lock().await;
                session_guard
                    .uid_copy(&sequence, &to_folder_owned)
                    .await
                    .map_err(|e| ImapError::Other(format!("Failed to copy message: {}", e)))
            }
        })
        .await?;

        self.run_command("STORE", {
            let session = session.clone();
            let sequence = sequence.clone();
            async move {
                let mut session_guard = session.lock().await;
                let mut store_stream = session_guard
                    .uid_store(&sequence, "+FLAGS (\\Deleted)")
                    .await
                    .map_err(|e| ImapError::Other(format!("Failed to mark as deleted: {}", e)))?;
                let _store_results: Vec<_> = store_stream
                    .try_collect()
                    .await
                    .map_err(|e| ImapError::Other(format!("Failed to process store results: {}", e)))?;
                Ok(())
            }
        })
        .await?;

        self.run_command("EXPUNGE", {
            let session = session.clone();
            async move {
                let mut session_guard = session.lock().await;
                let mut expunge_stream = session_guard
                    .expunge()
                    .await
                    .map_err(|e| ImapError::Other(format!("Failed to expunge: {}", e)))?;
                let _expunge_results: Vec<_> = expunge_stream
                    .try_collect()
                    .await
                    .map_err(|e| ImapError::Other(format!("Failed to process expunge results: {}", e)))?;
                Ok(())
            }
        })
        .await
    }

    async fn store_flags(&self, uids: &[u32], operation: FlagOperation, flags: &[String]) -> Result<(), ImapError> {
        let session = self.session.clone();
        let sequence = uids.iter().map(|uid| uid.to_string()).collect::<Vec<_>>().join(",");

        // Build the store command with flags
        let flags_str = flags.join(" ");
        let op_str = match operation {
            FlagOperation::Add => format!("+FLAGS ({})", flags_str),
            FlagOperation::Remove => format!("-FLAGS ({})", flags_str),
            FlagOperation::Set => format!("FLAGS ({})", flags_str),
        };

        self.run_command("STORE", async move {
            let mut session_guard = session.lock().await;
            let mut stream = session_guard.uid_store(&sequence, &op_str).await.map_err(ImapError::from)?;
            let result = stream.try_collect::<Vec<_>>().await;
            drop(session_guard);
            result.map(|_| ()).map_err(ImapError::from)
        })
        .await
    }

    async fn append(&self, folder: &str, content: &[u8], flags: &[String]) -> Result<(), ImapError> {
        // Convert String flags to async_imap Flag types
        let imap_flags: Vec<Flag> = flags
            .iter()
            .filter_map(|f| {
                match f.as_str() {
                    "\\Seen" => Some(Flag::Seen),
                    "\\Answered" => Some(Flag::Answered),
                    "\\Flagged" => Some(Flag::Flagged),
                    "\\Deleted" => Some(Flag::Deleted),
                    "\\Draft" => Some(Flag::Draft),
                    _ => None, // Skip unknown flags
                }
            })
            .collect();
        let _ = imap_flags; // async-imap's `append` takes no explicit flags argument

        // Clone the session Arc for move into spawn_blocking
        let session_arc = self.session.clone();
        let folder_str = folder.to_string();
        let folder_for_error = folder_str.clone(); // Clone for error messages
        let content = content.to_vec();
        let append_timeout = self.append_timeout;

        info!("Starting IMAP APPEND to folder '{}' with spawn_blocking (timeout: {:?})", folder_str, append_timeout);

        self.run_command("APPEND", async move {
            // Use spawn_blocking to run the IMAP APPEND in a dedicated blocking thread
            // This allows us to timeout even when the underlying I/O is blocking
            let blocking_task = tokio::task::spawn_blocking(move || {
                // Block on getting the mutex lock - this will happen in the blocking thread pool
                let runtime_handle = tokio::runtime::Handle::current();
                let mut session_guard = runtime_handle.block_on(session_arc.lock());

                // Perform the blocking IMAP APPEND operation
                debug!("Executing IMAP APPEND in blocking thread for folder '{}'", folder_str);
                runtime_handle.block_on(session_guard.append(&folder_str, &content))
            });

            // Apply timeout to the entire spawn_blocking task
            match tokio::time::timeout(append_timeout, blocking_task).await {
                Ok(Ok(Ok(()))) => {
                    info!("APPEND to folder '{}' completed successfully", folder_for_error);
                    Ok(())
                }
                Ok(Ok(Err(e))) => {
                    error!("APPEND to folder '{}' failed: {}", folder_for_error, e);
                    Err(ImapError::from(e))
                }
                Ok(Err(join_err)) => {
                    error!("APPEND spawn_blocking task panicked: {}", join_err);
                    Err(ImapError::Other(format!("APPEND task panicked: {}", join_err)))
                }
                Err(_elapsed) => {
                    error!("APPEND to folder '{}' timed out after {:?}", folder_for_error, append_timeout);
                    Err(ImapError::Timeout(format!(
                        "APPEND operation timed out after {:?}. The blocking thread was terminated. Server may be slow due to security scanning.",
                        append_timeout
                    )))
                }
            }
        })
        .await
    }

    async fn fetch_raw_message(&self, uid: u32) -> Result<Vec<u8>, ImapError> {
        let session = self.session.clone();
        let sequence = uid.to_string();
        self.run_command("FETCH", async move {
            let mut session_guard = session.lock().await;
            // uid_fetch needs &mut
            let mut fetch_stream = session_guard.uid_fetch(&sequence, "BODY[]")
                .await
                .map_err(ImapError::from)?;

            if let Some(fetch_result) = fetch_stream.try_next().await.map_err(ImapError::from)? {
                fetch_result.body()
                    .map(|b| b.to_vec())
                    .ok_or_else(|| ImapError::MissingData("Message body not found".to_string()))
            } else {
                Err(ImapError::MissingData("No fetch result found for UID".to_string()))
            }
        })
        .await
    }

    async fn expunge(&self) -> Result<(), ImapError> {
        let session = self.session.clone();
        self.run_command("EXPUNGE", async move {
            let mut session_guard = session.lock().await;
            // expunge needs &mut
            let mut stream = session_guard.expunge().await.map_err(ImapError::from)?;
            let result = stream.try_collect::<Vec<_>>().await;
            drop(session_guard);
            result.map(|_| ()).map_err(ImapError::from)
        })
        .await
    }

    async fn copy_messages(&self, uids: &[u32], to_folder: &str) -> Result<(), ImapError> {
        let session = self.session.clone();
        let sequence = uids.iter().map(|uid| uid.to_string()).collect::<Vec<_>>().join(",");
        let to_folder = to_folder.to_string();

        self.run_command("COPY", async move {
            let mut session_guard = session.lock().await;
            // Use uid_copy to copy messages to destination folder
            session_guard.uid_copy(&sequence, &to_folder)
                .await
                .map_err(|e| ImapError::Other(format!("Failed to copy messages: {}", e)))?;
            Ok(())
        })
        .await
    }

    async fn move_messages(&self, uids: &[u32], from_folder: &str, to_folder: &str) -> Result<(), ImapError> {
        if uids.is_empty() {
            return Ok(());
        }

        // Ensure the source folder is selected
        self.ensure_folder_selected(from_folder).await?;

        let session = self.session.clone();
        let sequence = uids.iter().map(|uid| uid.to_string()).collect::<Vec<_>>().join(",");
        let to_folder_owned = to_folder.to_string();

        // Try MOVE command first (RFC 6851) - more efficient for batch operations
        let moved = self
            .run_command("MOVE", {
                let session = session.clone();
                let sequence = sequence.clone();
                let to_folder_owned = to_folder_owned.clone();
                async move {
                    let mut session_guard = session.lock().await;
                    match session_guard.uid_mv(&sequence, &to_folder_owned).await {
                        Ok(_) => Ok(true),
                        Err(e) => {
                            debug!("Batch MOVE command failed, falling back to COPY+DELETE+EXPUNGE: {:?}", e);
                            Ok(false)
                        }
                    }
                }
            })
            .await?;

        if moved {
            debug!("Batch MOVE command succeeded for {} messages", uids.len());
            return Ok(());
        }

        // Fallback: COPY+DELETE+EXPUNGE sequence for batch
        self.run_command("COPY", {
            let session = session.clone();
            let sequence = sequence.clone();
            let to_folder_owned = to_folder_owned.clone();
            async move {
                let mut session_guard = session.lock().await;
                session_guard
                    .uid_copy(&sequence, &to_folder_owned)
                    .await
                    .map_err(|e| ImapError::Other(format!("Failed to copy messages: {}", e)))
            }
        })
        .await?;

        self.run_command("STORE", {
            let session = session.clone();
            let sequence = sequence.clone();
            async move {
                let mut session_guard = session.lock().await;
                let mut store_stream = session_guard
                    .uid_store(&sequence, "+FLAGS (\\Deleted)")
                    .await
                    .map_err(|e| ImapError::Other(format!("Failed to mark messages as deleted: {}", e)))?;
                let _store_results: Vec<_> = store_stream
                    .try_collect()
                    .await
                    .map_err(|e| ImapError::Other(format!("Failed to process store results: {}", e)))?;
                Ok(())
            }
        })
        .await?;

        // Step 3: Expunge to remove deleted messages
        self.expunge().await?;

        info!("Successfully moved {} messages from {} to {} using COPY+DELETE+EXPUNGE",
              uids.len(), from_folder, to_folder);
        Ok(())
    }

    async fn mark_as_deleted(&self, uids: &[u32]) -> Result<(), ImapError> {
        if uids.is_empty() {
            return Ok(());
        }

        debug!("Marking {} messages as deleted", uids.len());

        // Use the store_flags method to add the \Deleted flag
        self.store_flags(uids, FlagOperation::Add, &[String::from("\\Deleted")]).await?;

        info!("Successfully marked {} messages as deleted", uids.len());
        Ok(())
    }

    async fn delete_messages(&self, uids: &[u32]) -> Result<(), ImapError> {
        if uids.is_empty() {
            return Ok(());
        }

        debug!("Deleting {} messages (mark as deleted + expunge)", uids.len());

        // Step 1: Mark messages as deleted
        self.mark_as_deleted(uids).await?;

        // Step 2: Expunge to permanently remove deleted messages
        self.expunge().await?;

        info!("Successfully deleted {} messages permanently", uids.len());
        Ok(())
    }

    async fn undelete_messages(&self, uids: &[u32]) -> Result<(), ImapError> {
        if uids.is_empty() {
            return Ok(());
        }

        debug!("Removing \\Deleted flag from {} messages", uids.len());

        // Use the store_flags method to remove the \Deleted flag
        self.store_flags(uids, FlagOperation::Remove, &[String::from("\\Deleted")]).await?;

        info!("Successfully undeleted {} messages", uids.len());
        Ok(())
    }

    async fn noop(&self) -> Result<(), ImapError> {
        let session = self.session.clone();
        self.run_command("NOOP", async move {
            let mut session_guard = session.lock().await;
            // Send NOOP command to keep connection alive and check for updates
            session_guard.noop()
                .await
                .map(|_| ())
                .map_err(ImapError::from)
        })
        .await?;

        debug!("Successfully sent NOOP keepalive command");
        Ok(())
    }
}

/// Type alias for a factory function that creates IMAP clients
pub type ImapClientFactory = Box<dyn Fn() -> BoxFuture<'static, Result<ImapClient<AsyncImapSessionWrapper>, ImapError>> + Send + Sync>;

/// Creates a factory function for IMAP clients
///
/// # Arguments
/// * `hostname` - IMAP server hostname
/// * `port` - IMAP server port
/// * `username` - IMAP account username
/// * `password` - IMAP account password
///
/// # Returns
/// A boxed factory function that creates new IMAP client instances
pub fn create_imap_factory(
    host: String,
    port: u16,
    username: String,
    password: String,
    timeout: Duration,
) -> Result<ImapSessionFactory, ImapError> {
    // Create TLS connector with default configuration
    let tls = native_tls::TlsConnector::builder()
        .build()
        .map_err(|e| ImapError::Tls(e.to_string()))?;
    let tls = TlsConnector::from(tls);
    let tls = Arc::new(tls);

    // Store connection parameters in Arc for sharing
    let host = Arc::new(host);
    let username = Arc::new(username);
    let password = Arc::new(password);

    Ok(Box::new(move || {
        let host = host.clone();
        let username = username.clone();
        let password = password.clone();
        let tls = tls.clone();

        Box::pin(async move {
            // Connect to server via TCP
            let tcp_stream = TokioTcpStream::connect((host.as_str(), port))
                .await
                .map_err(|e| ImapError::Connection(e.to_string()))?;

            // Perform TLS handshake
            let tls_stream = tls
                .connect(host.as_str(), tcp_stream)
                .await
                .map_err(|e| ImapError::Tls(e.to_string()))?;

            // Convert to compatible stream type
            let compat_stream = tls_stream.compat();

            // Create IMAP client and login
            let client = async_imap::Client::new(compat_stream);
            let session = client
                .login(&*username, &*password)
                .await
                .map_err(|(err, _client)| ImapError::Auth(err.to_string()))?;

            Ok(session)
        })
    }))
}

// Note: Removed dead AsyncImapSession implementation
// All IMAP functionality is now in AsyncImapSessionWrapper
