//! Firebird session: socket, protocol negotiation and framed I/O.
//!
//! This module provides the transport half of an attachment:
//! - TCP connection establishment (keep-alive on, Nagle off)
//! - `op_connect` negotiation and SRP authentication
//! - Optional zlib compression once the server accepts it
//! - Ordered request buffering, flushing and response decoding
//!
//! A session is strictly half-duplex. Requests are appended to an output
//! buffer and sent on [`FbConnection::flush`]; responses are read back in
//! order. Any I/O failure marks the session closed.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tracing::{debug, info, warn};

use super::auth::AuthBlock;
use super::charset::Charset;
use super::config::FbConfig;
use super::error::{isc, FbError, FbResult, StatusArg, StatusError};
use super::protocol::*;
use super::wire::{BoxedStream, Channel, Wire};
use super::xdr::XdrRead;

/// Callback receiving server warnings.
pub type WarningHandler = Arc<dyn Fn(&StatusError) + Send + Sync>;

// ============================================================================
// Connection
// ============================================================================

/// A Firebird session.
pub struct FbConnection {
    /// Active transport
    channel: Channel,
    /// Requests buffered since the last flush
    out: BytesMut,
    host: String,
    port: u16,
    charset: Charset,
    packet_size: usize,
    timeout: Option<Duration>,
    /// Compression requested and not refused by the server
    compression: bool,
    protocol_version: i32,
    protocol_architecture: i32,
    protocol_min_type: i32,
    auth: Option<AuthBlock>,
    warning_handler: Option<WarningHandler>,
    closed: bool,
}

impl FbConnection {
    /// Open a socket to the configured server and negotiate the protocol.
    pub async fn connect(config: &FbConfig) -> FbResult<Self> {
        let stream = open_socket(&config.host, config.port, config.packet_size, config.timeout()).await?;
        let mut conn = Self::from_stream(Box::new(stream), config)?;
        let password = config.password.clone().unwrap_or_default();
        let auth = AuthBlock::new(&config.user, &password);
        conn.identify(&config.database, auth).await?;
        info!(
            host = %config.host,
            port = config.port,
            protocol = conn.protocol_version & FB_PROTOCOL_MASK,
            compressed = conn.channel.is_compressed(),
            "connected to Firebird"
        );
        Ok(conn)
    }

    /// Plain socket to an auxiliary port. No negotiation takes place.
    pub async fn connect_aux(host: &str, port: u16, timeout: Option<Duration>) -> FbResult<Self> {
        let config = FbConfig {
            host: host.to_string(),
            port,
            ..FbConfig::default()
        };
        let stream = open_socket(host, port, config.packet_size, timeout).await?;
        debug!(host, port, "auxiliary connection opened");
        Self::from_stream(Box::new(stream), &config)
    }

    /// Wrap an already connected stream. Used for tests and auxiliary sockets.
    pub fn from_stream(stream: BoxedStream, config: &FbConfig) -> FbResult<Self> {
        Ok(Self {
            channel: Channel::new(stream),
            out: BytesMut::with_capacity(config.packet_size),
            host: config.host.clone(),
            port: config.port,
            charset: config.resolve_charset()?,
            packet_size: config.packet_size,
            timeout: config.timeout(),
            compression: config.compression,
            protocol_version: 0,
            protocol_architecture: 0,
            protocol_min_type: 0,
            auth: None,
            warning_handler: None,
            closed: false,
        })
    }

    /// Run the `op_connect` negotiation and authentication for `database`.
    pub async fn identify(&mut self, database: &str, mut auth: AuthBlock) -> FbResult<()> {
        let request = ConnectRequest {
            path: database.to_string(),
            user_identification: auth.user_identification()?,
            protocols: ProtocolOffer::supported(self.compression),
        };
        self.send_message(&request).await?;

        let operation = self.read_operation().await?;
        match operation {
            op::ACCEPT | op::COND_ACCEPT | op::ACCEPT_DATA => {
                let mut version = self.read_i32().await?;
                self.protocol_architecture = self.read_i32().await?;
                let accepted_type = self.read_i32().await?;
                self.protocol_min_type = accepted_type & PTYPE_MASK;
                if version < 0 {
                    version = i32::from((version & FB_PROTOCOL_MASK) as u16) | FB_PROTOCOL_FLAG;
                }
                self.protocol_version = version;
                if self.compression && accepted_type & PFLAG_COMPRESS == 0 {
                    self.compression = false;
                }
                debug!(
                    operation,
                    version = version & FB_PROTOCOL_MASK,
                    min_type = self.protocol_min_type,
                    "protocol accepted"
                );

                if operation != op::ACCEPT {
                    let server_data = self.read_buffer().await?;
                    let plugin = self.read_string(Charset::Utf8).await?;
                    let authenticated = self.read_i32().await? != 0;
                    let keys = self.read_buffer().await?;
                    auth.start(server_data, &plugin, authenticated, keys)?;
                }
                if self.compression {
                    self.channel.enable_compression();
                }
                if operation == op::COND_ACCEPT {
                    self.continue_auth(&mut auth).await?;
                }
            }
            op::RESPONSE => {
                self.read_generic_response().await?;
                return Err(FbError::status(isc::CONNECT_REJECT));
            }
            other => {
                debug!(operation = other, "unexpected handshake reply");
                let _ = self.disconnect().await;
                return Err(FbError::status(isc::CONNECT_REJECT));
            }
        }

        self.auth = Some(auth);
        Ok(())
    }

    /// Exchange `op_cont_auth` until the server answers with a generic response,
    /// which is returned.
    pub(crate) async fn continue_auth(&mut self, auth: &mut AuthBlock) -> FbResult<GenericResponse> {
        loop {
            self.send_message(&auth.cont_auth()).await?;
            let operation = self.read_operation().await?;
            match self.process_operation(operation).await? {
                Response::ContAuth(next) => {
                    auth.start(next.server_data, &next.plugin_name, false, next.server_keys)?;
                }
                Response::Generic(response) => {
                    auth.complete(response.data.clone());
                    return Ok(response);
                }
                other => {
                    return Err(FbError::Protocol(format!(
                        "unexpected reply during authentication: {:?}",
                        other
                    )))
                }
            }
        }
    }

    /// Close the socket. Idempotent.
    pub async fn disconnect(&mut self) -> FbResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.out.clear();
        let result = self.channel.shutdown().await;
        self.channel.close();
        debug!(host = %self.host, port = self.port, "disconnected");
        result.map_err(FbError::Io)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    pub fn protocol_version(&self) -> i32 {
        self.protocol_version
    }

    /// Set the negotiated protocol directly (sessions built from a stream).
    pub fn set_protocol_version(&mut self, version: i32) {
        self.protocol_version = version;
    }

    pub fn protocol_architecture(&self) -> i32 {
        self.protocol_architecture
    }

    pub fn protocol_min_type(&self) -> i32 {
        self.protocol_min_type
    }

    pub fn is_compressed(&self) -> bool {
        self.channel.is_compressed()
    }

    /// Protocol 13 and later use a null bitmap in row messages.
    pub fn uses_null_bitmap(&self) -> bool {
        self.protocol_version >= PROTOCOL_VERSION13
    }

    pub fn auth(&self) -> Option<&AuthBlock> {
        self.auth.as_ref()
    }

    pub(crate) fn take_auth(&mut self) -> Option<AuthBlock> {
        self.auth.take()
    }

    pub(crate) fn restore_auth(&mut self, auth: AuthBlock) {
        self.auth = Some(auth);
    }

    pub fn set_warning_handler(&mut self, handler: Option<WarningHandler>) {
        self.warning_handler = handler;
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Append a request to the output buffer.
    pub fn buffer_message<M: FrontendMessage>(&mut self, msg: &M) -> FbResult<()> {
        if self.closed {
            return Err(FbError::ConnectionClosed);
        }
        msg.encode(&mut self.out, self.charset)
    }

    /// Send everything buffered.
    pub async fn flush(&mut self) -> FbResult<()> {
        if self.closed {
            return Err(FbError::ConnectionClosed);
        }
        let data = self.out.split().freeze();
        let result = async {
            self.channel.write_all(&data).await?;
            self.channel.flush().await
        }
        .await;
        result.map_err(|e| self.fail(e))
    }

    /// Buffer a request and flush.
    pub async fn send_message<M: FrontendMessage>(&mut self, msg: &M) -> FbResult<()> {
        self.buffer_message(msg)?;
        self.flush().await
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Next opcode, skipping `op_dummy` keep-alives.
    pub async fn read_operation(&mut self) -> FbResult<i32> {
        loop {
            let operation = self.read_i32().await?;
            if operation != op::DUMMY {
                return Ok(operation);
            }
        }
    }

    /// Read an `op_response`. A status error becomes `Err`; warnings are
    /// reported to the handler and attached to the response.
    pub async fn read_response(&mut self) -> FbResult<GenericResponse> {
        let operation = self.read_operation().await?;
        match self.process_operation(operation).await? {
            Response::Generic(response) => Ok(response),
            other => Err(FbError::Protocol(format!(
                "expected op_response, got {:?}",
                other
            ))),
        }
    }

    /// Decode the body of `operation`.
    pub async fn process_operation(&mut self, operation: i32) -> FbResult<Response> {
        debug!(operation, "response");
        match operation {
            op::RESPONSE => Ok(Response::Generic(self.read_generic_response().await?)),
            op::FETCH_RESPONSE => {
                let status = self.read_i32().await?;
                let count = self.read_i32().await?;
                Ok(Response::Fetch(FetchResponse { status, count }))
            }
            op::SQL_RESPONSE => Ok(Response::Sql(SqlResponse {
                count: self.read_i32().await?,
            })),
            op::CONT_AUTH => {
                let server_data = self.read_buffer().await?;
                let plugin_name = self.read_string(Charset::Utf8).await?;
                let plugin_list = self.read_string(Charset::Utf8).await?;
                let server_keys = self.read_buffer().await?;
                Ok(Response::ContAuth(ContAuthResponse {
                    server_data,
                    plugin_name,
                    plugin_list,
                    server_keys,
                }))
            }
            other => Err(FbError::Protocol(format!("unexpected operation {}", other))),
        }
    }

    async fn read_generic_response(&mut self) -> FbResult<GenericResponse> {
        let object_handle = self.read_i32().await?;
        let blob_id = self.read_i64().await?;
        let data = self.read_buffer().await?;
        let status = self.read_status_vector().await?;

        let mut response = GenericResponse {
            object_handle,
            blob_id,
            data,
            warning: None,
        };
        if !status.is_empty() {
            if !status.is_warning() {
                return Err(FbError::Server(status));
            }
            self.report_warning(&status);
            response.warning = Some(status);
        }
        Ok(response)
    }

    /// Decode a status vector up to `isc_arg_end`. Zero codes are dropped.
    pub async fn read_status_vector(&mut self) -> FbResult<StatusError> {
        let charset = self.charset;
        let mut args = Vec::new();
        loop {
            let kind = self.read_i32().await?;
            match kind {
                arg::END => break,
                arg::STRING => args.push(StatusArg::Text(self.read_string(charset).await?)),
                arg::INTERPRETED => {
                    args.push(StatusArg::Interpreted(self.read_string(charset).await?))
                }
                arg::SQL_STATE => args.push(StatusArg::SqlState(self.read_string(charset).await?)),
                arg::NUMBER => args.push(StatusArg::Number(self.read_i32().await?)),
                _ => {
                    let code = self.read_i32().await?;
                    if code != 0 {
                        args.push(match kind {
                            arg::GDS => StatusArg::Gds(code),
                            arg::WARNING => StatusArg::Warning(code),
                            _ => StatusArg::Other { kind, code },
                        });
                    }
                }
            }
        }
        Ok(StatusError::new(args))
    }

    fn report_warning(&self, status: &StatusError) {
        warn!(code = status.error_code(), "server warning: {}", status);
        if let Some(handler) = &self.warning_handler {
            handler(status);
        }
    }

    /// Mark the session closed after a transport failure.
    fn fail(&mut self, err: io::Error) -> FbError {
        self.closed = true;
        self.out.clear();
        self.channel.close();
        FbError::Io(err)
    }
}

impl XdrRead for FbConnection {
    async fn read_bytes(&mut self, len: usize) -> FbResult<Bytes> {
        if self.closed {
            return Err(FbError::ConnectionClosed);
        }
        let mut buf = BytesMut::zeroed(len);
        if let Err(e) = self.channel.read_exact(&mut buf).await {
            return Err(self.fail(e));
        }
        Ok(buf.freeze())
    }
}

impl fmt::Debug for FbConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FbConnection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("protocol_version", &(self.protocol_version & FB_PROTOCOL_MASK))
            .field("charset", &self.charset)
            .field("compressed", &self.channel.is_compressed())
            .field("closed", &self.closed)
            .finish()
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Resolve `host` (IPv4 first) and connect with keep-alive and no Nagle delay.
async fn open_socket(
    host: &str,
    port: u16,
    buffer_size: usize,
    timeout: Option<Duration>,
) -> FbResult<TcpStream> {
    let connect = async {
        let mut addrs: Vec<SocketAddr> = lookup_host((host, port)).await?.collect();
        addrs.sort_by_key(|addr| !addr.is_ipv4());
        let addr = addrs.first().copied().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("cannot resolve {}", host))
        })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_keepalive(true)?;
        socket.set_recv_buffer_size(buffer_size as u32)?;
        socket.set_send_buffer_size(buffer_size as u32)?;
        let stream = socket.connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok::<_, io::Error>(stream)
    };

    let stream = match timeout {
        Some(limit) => tokio::time::timeout(limit, connect)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??,
        None => connect.await?,
    };
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fb::xdr::XdrWrite;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn session() -> (FbConnection, DuplexStream) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let conn = FbConnection::from_stream(Box::new(client), &FbConfig::default()).unwrap();
        (conn, server)
    }

    fn generic(handle: i32, data: &[u8], status: &[(i32, i32)]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_xdr_i32(op::RESPONSE);
        buf.put_xdr_i32(handle);
        buf.put_xdr_i64(0);
        buf.put_xdr_buffer(data);
        for (kind, code) in status {
            buf.put_xdr_i32(*kind);
            buf.put_xdr_i32(*code);
        }
        buf.put_xdr_i32(arg::END);
        buf
    }

    #[tokio::test]
    async fn test_generic_response_skips_dummy() {
        let (mut conn, mut server) = session();
        let mut reply = BytesMut::new();
        reply.put_xdr_i32(op::DUMMY);
        reply.extend_from_slice(&generic(42, b"abc", &[]));
        server.write_all(&reply).await.unwrap();

        let response = conn.read_response().await.unwrap();
        assert_eq!(response.object_handle, 42);
        assert_eq!(&response.data[..], b"abc");
        assert!(response.warning.is_none());
    }

    #[tokio::test]
    async fn test_error_status_vector() {
        let (mut conn, mut server) = session();
        let mut reply = BytesMut::new();
        reply.put_xdr_i32(op::RESPONSE);
        reply.put_xdr_i32(0);
        reply.put_xdr_i64(0);
        reply.put_xdr_buffer(&[]);
        reply.put_xdr_i32(arg::GDS);
        reply.put_xdr_i32(335544665);
        reply.put_xdr_i32(arg::STRING);
        reply.put_xdr_str("PK_T", Charset::Utf8).unwrap();
        reply.put_xdr_i32(arg::NUMBER);
        reply.put_xdr_i32(7);
        reply.put_xdr_i32(arg::SQL_STATE);
        reply.put_xdr_str("23000", Charset::Utf8).unwrap();
        reply.put_xdr_i32(arg::END);
        server.write_all(&reply).await.unwrap();

        match conn.read_response().await {
            Err(FbError::Server(status)) => {
                assert_eq!(status.error_code(), 335544665);
                assert_eq!(status.sql_state(), Some("23000"));
                assert_eq!(status.args[1], StatusArg::Text("PK_T".to_string()));
                assert_eq!(status.args[2], StatusArg::Number(7));
            }
            other => panic!("expected server error, got {:?}", other),
        }
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_zero_codes_are_dropped() {
        let (mut conn, mut server) = session();
        server
            .write_all(&generic(1, &[], &[(arg::GDS, 0)]))
            .await
            .unwrap();
        let response = conn.read_response().await.unwrap();
        assert!(response.warning.is_none());
    }

    #[tokio::test]
    async fn test_warning_reaches_handler() {
        let (mut conn, mut server) = session();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        conn.set_warning_handler(Some(Arc::new(move |status: &StatusError| {
            assert_eq!(status.error_code(), 335544808);
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        server
            .write_all(&generic(3, &[], &[(arg::WARNING, 335544808)]))
            .await
            .unwrap();

        let response = conn.read_response().await.unwrap();
        assert!(response.warning.is_some());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_eof_closes_session() {
        let (mut conn, server) = session();
        drop(server);
        let err = conn.read_response().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(conn.is_closed());
        assert!(matches!(
            conn.send_message(&Opcode(op::DISCONNECT)).await,
            Err(FbError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_messages_are_buffered_until_flush() {
        let (mut conn, mut server) = session();
        conn.buffer_message(&ReleaseObject { op: op::COMMIT, handle: 5 }).unwrap();
        conn.buffer_message(&Opcode(op::DISCONNECT)).unwrap();
        conn.flush().await.unwrap();

        let mut buf = [0u8; 12];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 30, 0, 0, 0, 5, 0, 0, 0, 6]);
    }

    #[tokio::test]
    async fn test_accept_negotiates_version() {
        let (mut conn, mut server) = session();
        let mut reply = BytesMut::new();
        reply.put_xdr_i32(op::ACCEPT);
        reply.put_xdr_i32(PROTOCOL_VERSION12 | !0xFFFF);
        reply.put_xdr_i32(ARCH_GENERIC);
        reply.put_xdr_i32(PTYPE_LAZY_SEND);
        server.write_all(&reply).await.unwrap();

        conn.identify("employee", AuthBlock::new("", "")).await.unwrap();
        assert_eq!(conn.protocol_version(), PROTOCOL_VERSION12);
        assert!(!conn.uses_null_bitmap());
        assert!(!conn.is_compressed());

        let mut head = [0u8; 8];
        server.read_exact(&mut head).await.unwrap();
        assert_eq!(&head[..], &[0, 0, 0, 1, 0, 0, 0, 19]);
    }

    #[tokio::test]
    async fn test_accepted_type_drops_flag_bits() {
        let (mut conn, mut server) = session();
        let mut reply = BytesMut::new();
        reply.put_xdr_i32(op::ACCEPT);
        reply.put_xdr_i32(PROTOCOL_VERSION12 | !0xFFFF);
        reply.put_xdr_i32(ARCH_GENERIC);
        reply.put_xdr_i32(PTYPE_LAZY_SEND | PFLAG_COMPRESS);
        server.write_all(&reply).await.unwrap();

        conn.identify("employee", AuthBlock::new("", "")).await.unwrap();
        assert_eq!(conn.protocol_min_type(), PTYPE_LAZY_SEND);
        assert!(!conn.is_compressed());
    }

    #[tokio::test]
    async fn test_unexpected_handshake_reply_rejects() {
        let (mut conn, mut server) = session();
        let mut reply = BytesMut::new();
        reply.put_xdr_i32(op::REJECT);
        server.write_all(&reply).await.unwrap();

        let err = conn.identify("employee", AuthBlock::new("", "")).await.unwrap_err();
        assert_eq!(err.code(), Some(isc::CONNECT_REJECT));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_cont_auth_reply_decoding() {
        let (mut conn, mut server) = session();
        let mut reply = BytesMut::new();
        reply.put_xdr_buffer(b"salt");
        reply.put_xdr_str("Srp256", Charset::Utf8).unwrap();
        reply.put_xdr_str("Srp256,Srp", Charset::Utf8).unwrap();
        reply.put_xdr_buffer(b"");
        server.write_all(&reply).await.unwrap();

        match conn.process_operation(op::CONT_AUTH).await.unwrap() {
            Response::ContAuth(auth) => {
                assert_eq!(&auth.server_data[..], b"salt");
                assert_eq!(auth.plugin_name, "Srp256");
                assert_eq!(auth.plugin_list, "Srp256,Srp");
                assert!(auth.server_keys.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
