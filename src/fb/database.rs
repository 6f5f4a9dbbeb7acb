//! Database attachment.
//!
//! [`FbDatabase`] owns one [`FbConnection`] behind an async mutex. Every
//! request/response round trip takes the lock for its duration, so
//! transactions, statements and blobs created from the same attachment can
//! be used from several tasks without interleaving packets.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tracing::{debug, info, warn};

use super::charset::Charset;
use super::config::FbConfig;
use super::connection::{FbConnection, WarningHandler};
use super::error::{FbError, FbResult};
use super::events::{EventManager, EventSubscription};
use super::params::ParamBuffer;
use super::protocol::*;
use super::transaction::{FbTransaction, TransactionOptions};

const INVALID_HANDLE: i32 = -1;

// ============================================================================
// Handle Table
// ============================================================================

/// Kind of server object tracked by [`HandleTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Statement,
    Blob,
}

/// Live server handles of one attachment.
///
/// Statement and blob handles live in separate server namespaces, so the
/// same number may appear once per kind.
#[derive(Debug, Default)]
pub struct HandleTable {
    live: HashSet<(HandleKind, i32)>,
}

impl HandleTable {
    pub fn insert(&mut self, kind: HandleKind, handle: i32) {
        self.live.insert((kind, handle));
    }

    pub fn remove(&mut self, kind: HandleKind, handle: i32) -> bool {
        self.live.remove(&(kind, handle))
    }

    pub fn contains(&self, kind: HandleKind, handle: i32) -> bool {
        self.live.contains(&(kind, handle))
    }

    /// Reject operations on handles this attachment does not own.
    pub fn check(&self, kind: HandleKind, handle: i32) -> FbResult<()> {
        if self.contains(kind, handle) {
            Ok(())
        } else {
            Err(FbError::State(format!(
                "{:?} handle {} is not open on this attachment",
                kind, handle
            )))
        }
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn clear(&mut self) {
        self.live.clear();
    }
}

/// Release queued by a `Drop` impl, sent before the next round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeferredRelease {
    Statement(i32),
    Transaction(i32),
}

// ============================================================================
// Database Info
// ============================================================================

/// Parsed `op_info_database` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub server_version: Option<String>,
    /// ODS major and minor version
    pub ods_version: Option<(i32, i32)>,
    pub page_size: Option<i32>,
    pub dialect: Option<i32>,
    pub charset_id: Option<i32>,
}

impl DatabaseInfo {
    pub const ITEMS: [u8; 7] = [
        info::FIREBIRD_VERSION,
        info::ODS_VERSION,
        info::ODS_MINOR_VERSION,
        info::PAGE_SIZE,
        info::DB_SQL_DIALECT,
        info::ATT_CHARSET,
        info::END,
    ];

    /// Parse the tagged buffer returned for [`DatabaseInfo::ITEMS`].
    pub fn parse(buf: &[u8]) -> FbResult<Self> {
        let mut parsed = DatabaseInfo::default();
        let mut ods_minor = 0;
        for (item, value) in info_items(buf)? {
            match item {
                info::FIREBIRD_VERSION => parsed.server_version = parse_version_string(value),
                info::ODS_VERSION => {
                    parsed.ods_version = Some((vax_integer(value) as i32, ods_minor))
                }
                info::ODS_MINOR_VERSION => ods_minor = vax_integer(value) as i32,
                info::PAGE_SIZE => parsed.page_size = Some(vax_integer(value) as i32),
                info::DB_SQL_DIALECT => parsed.dialect = Some(vax_integer(value) as i32),
                info::ATT_CHARSET => parsed.charset_id = Some(vax_integer(value) as i32),
                info::ERROR => {
                    return Err(FbError::Protocol("database info item rejected".to_string()))
                }
                _ => {}
            }
        }
        if let Some((major, _)) = parsed.ods_version {
            parsed.ods_version = Some((major, ods_minor));
        }
        Ok(parsed)
    }
}

/// `isc_info_firebird_version`: a count byte, then length-prefixed strings.
/// The first string is the server version.
fn parse_version_string(value: &[u8]) -> Option<String> {
    if value.len() < 2 {
        return None;
    }
    let len = value[1] as usize;
    value
        .get(2..2 + len)
        .map(|s| String::from_utf8_lossy(s).into_owned())
}

// ============================================================================
// Shared State
// ============================================================================

pub(crate) struct DbShared {
    conn: AsyncMutex<FbConnection>,
    handle: AtomicI32,
    transaction_count: AtomicUsize,
    pub(crate) handles: Mutex<HandleTable>,
    deferred: Mutex<Vec<DeferredRelease>>,
    events: AsyncMutex<Option<EventManager>>,
    next_event_id: AtomicI32,
    server_version: Mutex<Option<String>>,
    charset: Charset,
    dialect: i32,
    fetch_size: usize,
    packet_size: usize,
}

impl DbShared {
    /// Lock the session for one round trip, first sending queued releases.
    pub(crate) async fn lock(&self) -> FbResult<MutexGuard<'_, FbConnection>> {
        let mut conn = self.conn.lock().await;
        if conn.is_closed() {
            return Err(FbError::ConnectionClosed);
        }
        let pending: Vec<DeferredRelease> = std::mem::take(&mut *self.deferred.lock());
        if !pending.is_empty() {
            self.send_deferred(&mut conn, pending).await?;
        }
        Ok(conn)
    }

    async fn send_deferred(
        &self,
        conn: &mut FbConnection,
        pending: Vec<DeferredRelease>,
    ) -> FbResult<()> {
        for release in &pending {
            match *release {
                DeferredRelease::Statement(handle) => {
                    self.handles.lock().remove(HandleKind::Statement, handle);
                    conn.buffer_message(&FreeStatement {
                        stmt_handle: handle,
                        option: DSQL_DROP,
                    })?;
                }
                DeferredRelease::Transaction(handle) => {
                    conn.buffer_message(&ReleaseObject {
                        op: op::ROLLBACK,
                        handle,
                    })?;
                }
            }
        }
        conn.flush().await?;
        for release in pending {
            match conn.read_response().await {
                Ok(_) => debug!(?release, "deferred release sent"),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(?release, error = %e, "deferred release failed"),
            }
        }
        Ok(())
    }

    pub(crate) fn defer(&self, release: DeferredRelease) {
        self.deferred.lock().push(release);
    }

    pub(crate) fn handle(&self) -> i32 {
        self.handle.load(Ordering::Acquire)
    }

    pub(crate) fn charset(&self) -> Charset {
        self.charset
    }

    pub(crate) fn dialect(&self) -> i32 {
        self.dialect
    }

    pub(crate) fn fetch_size(&self) -> usize {
        self.fetch_size
    }

    pub(crate) fn packet_size(&self) -> usize {
        self.packet_size
    }

    pub(crate) fn transaction_started(&self) {
        self.transaction_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn transaction_finished(&self) {
        let _ = self
            .transaction_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

// ============================================================================
// Database
// ============================================================================

/// An attachment to a Firebird database.
///
/// Cloning is cheap and yields another reference to the same attachment.
#[derive(Clone)]
pub struct FbDatabase {
    pub(crate) shared: Arc<DbShared>,
}

impl FbDatabase {
    /// Connect and attach to `config.database`.
    pub async fn attach(config: &FbConfig) -> FbResult<Self> {
        let conn = FbConnection::connect(config).await?;
        Self::attach_with(conn, config).await
    }

    /// Attach over an already negotiated session.
    pub async fn attach_with(conn: FbConnection, config: &FbConfig) -> FbResult<Self> {
        let db = Self::wrap(conn, config);
        let result = async {
            let dpb = {
                let conn = db.shared.conn.lock().await;
                build_dpb(&conn, config, false)?
            };
            let response = db
                .attach_request(op::ATTACH, &config.database, dpb)
                .await?;
            db.shared.handle.store(response.object_handle, Ordering::Release);
            db.refresh_server_version().await
        }
        .await;

        match result {
            Ok(()) => {
                info!(
                    database = %config.database,
                    handle = db.handle(),
                    version = db.server_version().as_deref().unwrap_or("unknown"),
                    "attached"
                );
                Ok(db)
            }
            Err(e) => {
                db.safe_detach().await;
                Err(e)
            }
        }
    }

    /// Create `config.database` on the server. The new database is detached
    /// before returning and the transport is closed on every path.
    pub async fn create_database(config: &FbConfig) -> FbResult<()> {
        let conn = FbConnection::connect(config).await?;
        Self::create_with(conn, config).await
    }

    pub async fn create_with(conn: FbConnection, config: &FbConfig) -> FbResult<()> {
        let db = Self::wrap(conn, config);
        let result = async {
            let dpb = {
                let conn = db.shared.conn.lock().await;
                build_dpb(&conn, config, true)?
            };
            let response = db.attach_request(op::CREATE, &config.database, dpb).await?;
            db.shared.handle.store(response.object_handle, Ordering::Release);
            info!(database = %config.database, "database created");
            db.detach().await
        }
        .await;

        if result.is_err() {
            db.safe_detach().await;
        }
        result
    }

    /// Drop the attached database. The transport is closed on every path.
    pub async fn drop_database(&self) -> FbResult<()> {
        self.close_events().await;
        let result = async {
            let mut conn = self.shared.lock().await?;
            conn.send_message(&ReleaseObject {
                op: op::DROP_DATABASE,
                handle: self.handle(),
            })
            .await?;
            conn.read_response().await.map(|_| ())
        }
        .await;

        self.shared.handle.store(INVALID_HANDLE, Ordering::Release);
        self.shared.handles.lock().clear();
        let mut conn = self.shared.conn.lock().await;
        let _ = conn.disconnect().await;
        if result.is_ok() {
            info!("database dropped");
        }
        result
    }

    /// Detach and close the transport.
    ///
    /// Fails without any I/O while transactions are still open.
    pub async fn detach(&self) -> FbResult<()> {
        let open = self.transaction_count();
        if open > 0 {
            return Err(FbError::State(format!(
                "cannot detach with {} open transaction(s)",
                open
            )));
        }

        self.close_events().await;
        let mut conn = self.shared.lock().await?;
        let handle = self.handle();
        let result = async {
            if handle != INVALID_HANDLE {
                conn.buffer_message(&ReleaseObject {
                    op: op::DETACH,
                    handle,
                })?;
            }
            conn.buffer_message(&Opcode(op::DISCONNECT))?;
            conn.flush().await?;
            if handle != INVALID_HANDLE {
                conn.read_response().await?;
            }
            Ok(())
        }
        .await;

        self.shared.handle.store(INVALID_HANDLE, Ordering::Release);
        self.shared.handles.lock().clear();
        let closed = conn.disconnect().await;
        info!(handle, "detached");
        result.and(closed)
    }

    /// Best-effort teardown after a failed attach or create.
    async fn safe_detach(&self) {
        let mut conn = self.shared.conn.lock().await;
        if !conn.is_closed() {
            let _ = conn.send_message(&Opcode(op::DISCONNECT)).await;
            let _ = conn.disconnect().await;
        }
        self.shared.handle.store(INVALID_HANDLE, Ordering::Release);
    }

    fn wrap(conn: FbConnection, config: &FbConfig) -> Self {
        let charset = conn.charset();
        Self {
            shared: Arc::new(DbShared {
                conn: AsyncMutex::new(conn),
                handle: AtomicI32::new(INVALID_HANDLE),
                transaction_count: AtomicUsize::new(0),
                handles: Mutex::new(HandleTable::default()),
                deferred: Mutex::new(Vec::new()),
                events: AsyncMutex::new(None),
                next_event_id: AtomicI32::new(0),
                server_version: Mutex::new(None),
                charset,
                dialect: config.dialect,
                fetch_size: config.fetch_size.max(1),
                packet_size: config.packet_size,
            }),
        }
    }

    /// Database wrapping an already attached session.
    #[cfg(test)]
    pub(crate) fn attached(conn: FbConnection, config: &FbConfig, handle: i32) -> Self {
        let db = Self::wrap(conn, config);
        db.shared.handle.store(handle, Ordering::Release);
        db
    }

    /// Send `op_attach`/`op_create` and follow any protocol 13 auth rounds.
    async fn attach_request(&self, opcode: i32, path: &str, dpb: Vec<u8>) -> FbResult<GenericResponse> {
        let mut conn = self.shared.conn.lock().await;
        conn.send_message(&AttachRequest {
            op: opcode,
            path: path.to_string(),
            dpb,
        })
        .await?;

        let operation = conn.read_operation().await?;
        match conn.process_operation(operation).await? {
            Response::Generic(response) => Ok(response),
            Response::ContAuth(first) => {
                let mut auth = conn
                    .take_auth()
                    .ok_or_else(|| FbError::Auth("no authentication state".to_string()))?;
                let result = async {
                    auth.start(first.server_data, &first.plugin_name, false, first.server_keys)?;
                    conn.continue_auth(&mut auth).await
                }
                .await;
                conn.restore_auth(auth);
                result
            }
            other => Err(FbError::Protocol(format!(
                "unexpected reply to attach: {:?}",
                other
            ))),
        }
    }

    // ========================================================================
    // Info
    // ========================================================================

    /// Raw `op_info_database` reply for `items`.
    pub async fn info(&self, items: &[u8], buffer_length: i32) -> FbResult<Bytes> {
        let mut conn = self.shared.lock().await?;
        conn.send_message(&InfoRequest {
            op: op::INFO_DATABASE,
            handle: self.handle(),
            items: items.to_vec(),
            buffer_length,
        })
        .await?;
        Ok(conn.read_response().await?.data)
    }

    pub async fn database_info(&self) -> FbResult<DatabaseInfo> {
        let data = self
            .info(&DatabaseInfo::ITEMS, DATABASE_INFO_BUFFER_SIZE)
            .await?;
        DatabaseInfo::parse(&data)
    }

    async fn refresh_server_version(&self) -> FbResult<()> {
        let data = self
            .info(&[info::FIREBIRD_VERSION, info::END], DATABASE_INFO_BUFFER_SIZE)
            .await?;
        let parsed = DatabaseInfo::parse(&data)?;
        *self.shared.server_version.lock() = parsed.server_version;
        Ok(())
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    pub async fn begin_transaction(&self, options: &TransactionOptions) -> FbResult<FbTransaction> {
        FbTransaction::begin(self, options).await
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Arm `subscription` on the server.
    ///
    /// The first call opens the auxiliary event connection. Notifications
    /// are one-shot: re-queue after each one to keep listening.
    pub async fn queue_events(&self, subscription: &mut EventSubscription) -> FbResult<()> {
        let mut events = self.shared.events.lock().await;
        if events.is_none() {
            *events = Some(self.open_event_manager().await?);
        }
        let manager = events
            .as_ref()
            .ok_or_else(|| FbError::State("event manager is not running".to_string()))?;

        let local_id = self.shared.next_event_id.fetch_add(1, Ordering::AcqRel) + 1;
        let epb = subscription.to_epb()?;
        if subscription.local_id() != 0 {
            manager.unregister(subscription.local_id());
        }
        manager.register(local_id, subscription.sender());

        let result = async {
            let mut conn = self.shared.lock().await?;
            conn.send_message(&QueEvents {
                db_handle: self.handle(),
                epb,
                local_id,
            })
            .await?;
            conn.read_response().await
        }
        .await;

        match result {
            Ok(response) => {
                subscription.set_ids(local_id, response.object_handle);
                debug!(local_id, remote_id = response.object_handle, "events queued");
                Ok(())
            }
            Err(e) => {
                manager.unregister(local_id);
                Err(e)
            }
        }
    }

    /// Cancel a queued subscription. A notification already in flight may
    /// still be delivered once.
    pub async fn cancel_events(&self, subscription: &EventSubscription) -> FbResult<()> {
        let events = self.shared.events.lock().await;
        let manager = events
            .as_ref()
            .ok_or_else(|| FbError::State("no events are queued".to_string()))?;
        manager.unregister(subscription.local_id());

        let mut conn = self.shared.lock().await?;
        conn.send_message(&CancelEvents {
            db_handle: self.handle(),
            local_id: subscription.local_id(),
        })
        .await?;
        conn.read_response().await?;
        Ok(())
    }

    async fn open_event_manager(&self) -> FbResult<EventManager> {
        let (host, port, timeout) = {
            let mut conn = self.shared.lock().await?;
            conn.send_message(&ConnectAuxRequest {
                db_handle: self.handle(),
            })
            .await?;
            let response = conn.read_response().await?;
            let port = aux_port(&response.data)?;
            (conn.host().to_string(), port, conn.timeout())
        };
        let aux = FbConnection::connect_aux(&host, port, timeout).await?;
        Ok(EventManager::start(aux))
    }

    async fn close_events(&self) {
        if let Some(manager) = self.shared.events.lock().await.take() {
            manager.close();
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Server-assigned attachment handle (-1 once detached).
    pub fn handle(&self) -> i32 {
        self.shared.handle()
    }

    pub fn charset(&self) -> Charset {
        self.shared.charset
    }

    pub fn dialect(&self) -> i32 {
        self.shared.dialect
    }

    pub fn server_version(&self) -> Option<String> {
        self.shared.server_version.lock().clone()
    }

    pub fn transaction_count(&self) -> usize {
        self.shared.transaction_count.load(Ordering::Acquire)
    }

    pub fn open_handles(&self) -> usize {
        self.shared.handles.lock().len()
    }

    /// True once the transport has been closed.
    pub async fn is_closed(&self) -> bool {
        self.shared.conn.lock().await.is_closed()
    }

    /// Attached and not known to be closed. A session busy with a round
    /// trip counts as attached.
    pub fn is_attached(&self) -> bool {
        if self.handle() == INVALID_HANDLE {
            return false;
        }
        match self.shared.conn.try_lock() {
            Ok(conn) => !conn.is_closed(),
            Err(_) => true,
        }
    }

    /// Install the callback receiving server warnings.
    pub async fn set_warning_handler(&self, handler: Option<WarningHandler>) {
        self.shared.conn.lock().await.set_warning_handler(handler);
    }
}

impl std::fmt::Debug for FbDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FbDatabase")
            .field("handle", &self.handle())
            .field("transactions", &self.transaction_count())
            .field("charset", &self.shared.charset)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Port from the sockaddr returned by `op_connect_request`.
fn aux_port(data: &[u8]) -> FbResult<u16> {
    if data.len() < 4 {
        return Err(FbError::Protocol(format!(
            "connect_request reply too short: {} bytes",
            data.len()
        )));
    }
    Ok(u16::from_be_bytes([data[2], data[3]]))
}

fn build_dpb(conn: &FbConnection, config: &FbConfig, create: bool) -> FbResult<Vec<u8>> {
    let charset = conn.charset();
    let mut block = ParamBuffer::new(dpb::VERSION1);
    block.put_int(dpb::SQL_DIALECT, config.dialect);
    block.put_str(dpb::LC_CTYPE, charset.name())?;
    if !config.user.is_empty() {
        block.put_str(dpb::USER_NAME, &config.user)?;
    }
    if let Some(role) = config.role.as_deref().filter(|r| !r.is_empty()) {
        block.put_str(dpb::SQL_ROLE_NAME, role)?;
    }
    if let Some(secs) = config.connect_timeout {
        block.put_int(dpb::CONNECT_TIMEOUT, i32::try_from(secs).unwrap_or(i32::MAX));
    }
    block.put_int(dpb::PROCESS_ID, std::process::id() as i32);
    block.put_str(dpb::PROCESS_NAME, &process_name(config))?;
    block.put_str(
        dpb::CLIENT_VERSION,
        concat!("fbwire ", env!("CARGO_PKG_VERSION")),
    )?;

    if create {
        if let Some(size) = config.page_size {
            block.put_int(dpb::PAGE_SIZE, size);
        }
        if let Some(forced) = config.force_write {
            block.put_int(dpb::FORCE_WRITE, i32::from(forced));
        }
        block.put_str(dpb::SET_DB_CHARSET, charset.name())?;
    }

    if conn.protocol_version() >= PROTOCOL_VERSION13 {
        if let Some(auth) = conn.auth() {
            auth.write_dpb(&mut block)?;
        }
    } else if let Some(password) = config.password.as_deref() {
        block.put_str(dpb::PASSWORD, password)?;
    }
    Ok(block.into_bytes())
}

/// Process name for `isc_dpb_process_name`, cut to the 255 byte cluster limit.
fn process_name(config: &FbConfig) -> String {
    let mut name = config.process_name.clone().unwrap_or_else(|| {
        std::env::current_exe()
            .ok()
            .and_then(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_default()
    });
    while name.len() > 255 {
        name.pop();
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_table_kinds_are_separate() {
        let mut table = HandleTable::default();
        table.insert(HandleKind::Statement, 3);
        assert!(table.check(HandleKind::Statement, 3).is_ok());
        assert!(matches!(
            table.check(HandleKind::Blob, 3),
            Err(FbError::State(_))
        ));
        assert!(table.remove(HandleKind::Statement, 3));
        assert!(table.is_empty());
    }

    #[test]
    fn test_database_info_parse() {
        let mut buf = vec![info::FIREBIRD_VERSION, 8, 0, 1, 6];
        buf.extend_from_slice(b"WI-V5.");
        buf.extend_from_slice(&[info::ODS_VERSION, 1, 0, 13]);
        buf.extend_from_slice(&[info::ODS_MINOR_VERSION, 1, 0, 1]);
        buf.extend_from_slice(&[info::PAGE_SIZE, 2, 0, 0x00, 0x20]);
        buf.extend_from_slice(&[info::DB_SQL_DIALECT, 1, 0, 3]);
        buf.push(info::END);

        let parsed = DatabaseInfo::parse(&buf).unwrap();
        assert_eq!(parsed.server_version.as_deref(), Some("WI-V5."));
        assert_eq!(parsed.ods_version, Some((13, 1)));
        assert_eq!(parsed.page_size, Some(8192));
        assert_eq!(parsed.dialect, Some(3));
        assert_eq!(parsed.charset_id, None);
    }

    #[test]
    fn test_aux_port_from_sockaddr() {
        assert_eq!(aux_port(&[0, 2, 0x0B, 0xEA, 127, 0, 0, 1]).unwrap(), 3050);
        assert!(aux_port(&[0, 2]).is_err());
    }
}
