//! MySQL/MariaDB connection for benchmark traffic
//!
//! One connection is bound to exactly one variant: the variant decides
//! whether statements go out as COM_QUERY text or prepared binary
//! execution, whether prepared statements are cached, and whether batch
//! members are pipelined into a single flush.

use std::io;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use lru::LruCache;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use crate::config::TlsConfig;
use crate::utils::wire::{self, ErrPacket, OkPacket, PrepareOk, ServerHandshake};
use crate::utils::{ProvisioningError, UnitOfWorkError};
use crate::variant::{TransportSecurity, Variant, WireMode};
use crate::workload::Batch;

/// Initial read/write buffer capacity
const BUFFER_CAPACITY: usize = 65536;

/// Server-side prepared statements kept per connection when the
/// variant's statement cache is on (matches the upstream connector's
/// default cache size)
const STMT_CACHE_SIZE: usize = 250;

/// Connection parameters shared by every variant
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub connect_timeout: Duration,
    pub tls: TlsConfig,
}

/// Plain TCP or TLS stream
enum Stream {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Stream {
    async fn read_buf(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read_buf(buf).await,
            Stream::Tls(s) => s.read_buf(buf).await,
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.write_all(data).await,
            Stream::Tls(s) => s.write_all(data).await,
        }
    }

    async fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.flush().await,
            Stream::Tls(s) => s.flush().await,
        }
    }
}

/// One live connection bound to a variant
pub struct Connection {
    stream: Stream,
    buffer: BytesMut,
    write_buf: BytesMut,
    variant: Variant,
    stmt_cache: LruCache<String, PrepareOk>,
    connection_id: u32,
}

impl Connection {
    /// Establish a connection: TCP connect, optional TLS upgrade,
    /// handshake and authentication
    pub async fn connect(opts: &ConnectOptions, variant: Variant) -> Result<Self, ProvisioningError> {
        let addr = format!("{}:{}", opts.host, opts.port);
        let tcp = tokio::time::timeout(opts.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ProvisioningError::Timeout(opts.connect_timeout))?
            .map_err(|e| ProvisioningError::ConnectFailed {
                host: opts.host.clone(),
                port: opts.port,
                source: e,
            })?;
        tcp.set_nodelay(true).ok();

        let mut stream = Stream::Tcp(tcp);
        let mut buffer = BytesMut::with_capacity(BUFFER_CAPACITY);

        let (payload, seq) = read_packet(&mut stream, &mut buffer)
            .await
            .map_err(|e| ProvisioningError::ConnectFailed {
                host: opts.host.clone(),
                port: opts.port,
                source: e,
            })?;

        if payload.first() == Some(&wire::ERR_HEADER) {
            let err = ErrPacket::parse(&payload)
                .map_err(|e| ProvisioningError::Rejected(e.to_string()))?;
            return Err(ProvisioningError::Rejected(format!(
                "{} ({})",
                err.message, err.code
            )));
        }

        let handshake = ServerHandshake::parse(&payload)
            .map_err(|e| ProvisioningError::Rejected(e.to_string()))?;

        let mut capabilities = wire::base_capabilities(!opts.database.is_empty());
        let mut next_seq = seq.wrapping_add(1);

        if variant.security == TransportSecurity::Tls {
            capabilities |= wire::CLIENT_SSL;
            let mut out = BytesMut::new();
            wire::write_frame(&mut out, next_seq, &wire::build_ssl_request(capabilities));
            write_flush(&mut stream, &out).await?;
            stream = upgrade_tls(stream, opts).await?;
            next_seq = next_seq.wrapping_add(1);
        }

        let auth = wire::scramble_native_password(&handshake.auth_seed, &opts.password);
        let response =
            wire::build_handshake_response(capabilities, &opts.user, &auth, &opts.database);
        let mut out = BytesMut::new();
        wire::write_frame(&mut out, next_seq, &response);
        write_flush(&mut stream, &out).await?;

        authenticate(&mut stream, &mut buffer, opts, &handshake).await?;

        let cache_size = if variant.cache_statements {
            STMT_CACHE_SIZE
        } else {
            1
        };

        Ok(Self {
            stream,
            buffer,
            write_buf: BytesMut::with_capacity(BUFFER_CAPACITY),
            variant,
            stmt_cache: LruCache::new(NonZeroUsize::new(cache_size).expect("cache size")),
            connection_id: handshake.connection_id,
        })
    }

    /// Server-assigned connection id (the SHOW PROCESSLIST id)
    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    pub fn variant(&self) -> &Variant {
        &self.variant
    }

    /// Execute one statement and discard whatever comes back
    pub async fn execute_discard(&mut self, sql: &str) -> Result<(), UnitOfWorkError> {
        match self.variant.wire_mode {
            WireMode::Text => self.query_discard(sql).await,
            WireMode::Binary => self.execute_prepared_discard(sql, &[]).await,
        }
    }

    /// Execute a batch, honoring the variant's rewrite and pipelining
    /// settings
    pub async fn execute_batch(&mut self, batch: &Batch) -> Result<(), UnitOfWorkError> {
        if self.variant.rewrite_batched {
            // Collapse the whole batch into one multi-value statement
            return self.execute_discard(&batch.rewritten()).await;
        }

        match self.variant.wire_mode {
            WireMode::Text => self.batch_text(batch).await,
            WireMode::Binary => self.batch_binary(batch).await,
        }
    }

    /// Liveness check
    pub async fn ping(&mut self) -> Result<(), UnitOfWorkError> {
        self.send_command(&wire::build_com_ping()).await?;
        let payload = self.read_reply().await?;
        expect_ok(&payload)
    }

    /// Graceful termination: COM_QUIT then drop
    pub async fn shutdown(mut self) {
        let mut out = BytesMut::with_capacity(8);
        wire::write_frame(&mut out, 0, &wire::build_com_quit());
        let _ = self.stream.write_all(&out).await;
        let _ = self.stream.flush().await;
    }

    async fn query_discard(&mut self, sql: &str) -> Result<(), UnitOfWorkError> {
        self.send_command(&wire::build_com_query(sql)).await?;
        self.read_response_discard().await
    }

    async fn execute_prepared_discard(
        &mut self,
        sql: &str,
        params: &[i64],
    ) -> Result<(), UnitOfWorkError> {
        let prepared = self.lookup_or_prepare(sql).await?;
        self.send_command(&wire::build_com_stmt_execute(prepared.statement_id, params))
            .await?;
        self.read_response_discard().await?;
        if !self.variant.cache_statements {
            self.close_statement(prepared.statement_id).await?;
        }
        Ok(())
    }

    /// Text batch: one round trip per member, or one flush for the whole
    /// batch when pipelining is on
    async fn batch_text(&mut self, batch: &Batch) -> Result<(), UnitOfWorkError> {
        if self.variant.pipelining {
            self.write_buf.clear();
            for statement in batch.statements() {
                wire::write_frame(&mut self.write_buf, 0, &wire::build_com_query(&statement));
            }
            let out = self.write_buf.split();
            self.flush_out(&out).await?;
            for _ in 0..batch.len() {
                self.read_response_discard().await?;
            }
            Ok(())
        } else {
            for statement in batch.statements() {
                self.query_discard(&statement).await?;
            }
            Ok(())
        }
    }

    /// Binary batch: prepare the template once, then execute per value;
    /// with pipelining all executions go out in a single flush
    async fn batch_binary(&mut self, batch: &Batch) -> Result<(), UnitOfWorkError> {
        let template = batch.template();
        let prepared = self.lookup_or_prepare(&template).await?;

        if self.variant.pipelining {
            self.write_buf.clear();
            for value in batch.values() {
                wire::write_frame(
                    &mut self.write_buf,
                    0,
                    &wire::build_com_stmt_execute(prepared.statement_id, &[*value]),
                );
            }
            let out = self.write_buf.split();
            self.flush_out(&out).await?;
            for _ in 0..batch.len() {
                self.read_response_discard().await?;
            }
        } else {
            for value in batch.values() {
                self.send_command(&wire::build_com_stmt_execute(
                    prepared.statement_id,
                    &[*value],
                ))
                .await?;
                self.read_response_discard().await?;
            }
        }

        if !self.variant.cache_statements {
            self.close_statement(prepared.statement_id).await?;
        }
        Ok(())
    }

    async fn lookup_or_prepare(&mut self, sql: &str) -> Result<PrepareOk, UnitOfWorkError> {
        if self.variant.cache_statements {
            if let Some(prepared) = self.stmt_cache.get(sql) {
                return Ok(*prepared);
            }
        }

        let prepared = self.prepare(sql).await?;

        if self.variant.cache_statements {
            if let Some((_, evicted)) = self.stmt_cache.push(sql.to_string(), prepared) {
                if evicted.statement_id != prepared.statement_id {
                    self.close_statement(evicted.statement_id).await?;
                }
            }
        }
        Ok(prepared)
    }

    async fn prepare(&mut self, sql: &str) -> Result<PrepareOk, UnitOfWorkError> {
        self.send_command(&wire::build_com_stmt_prepare(sql)).await?;

        let payload = self.read_reply().await?;
        if payload.first() == Some(&wire::ERR_HEADER) {
            return Err(server_error(&payload));
        }
        let prepared = PrepareOk::parse(&payload).map_err(io_to_work)?;

        // Drain parameter and column definition blocks with their EOFs
        if prepared.num_params > 0 {
            self.drain_definitions(prepared.num_params as usize).await?;
        }
        if prepared.num_columns > 0 {
            self.drain_definitions(prepared.num_columns as usize).await?;
        }
        Ok(prepared)
    }

    /// COM_STMT_CLOSE has no response packet
    async fn close_statement(&mut self, statement_id: u32) -> Result<(), UnitOfWorkError> {
        self.send_command(&wire::build_com_stmt_close(statement_id))
            .await
    }

    async fn drain_definitions(&mut self, count: usize) -> Result<(), UnitOfWorkError> {
        for _ in 0..count {
            self.read_reply().await?;
        }
        let payload = self.read_reply().await?;
        if !wire::is_eof_packet(&payload) {
            return Err(UnitOfWorkError::Malformed(
                "Expected EOF after definition block".to_string(),
            ));
        }
        Ok(())
    }

    /// Read one statement response and discard it: OK, ERR, or a result
    /// set (column definitions, EOF, rows, EOF)
    async fn read_response_discard(&mut self) -> Result<(), UnitOfWorkError> {
        let payload = self.read_reply().await?;
        match payload.first() {
            Some(&wire::OK_HEADER) => Ok(()),
            Some(&wire::ERR_HEADER) => Err(server_error(&payload)),
            Some(&0xfb) => Err(UnitOfWorkError::Malformed(
                "LOCAL INFILE requests are not supported".to_string(),
            )),
            Some(_) => {
                let columns = wire::parse_column_count(&payload).map_err(io_to_work)?;
                self.drain_definitions(columns as usize).await?;
                // Rows until the closing EOF
                loop {
                    let row = self.read_reply().await?;
                    if wire::is_eof_packet(&row) {
                        return Ok(());
                    }
                    if row.first() == Some(&wire::ERR_HEADER) {
                        return Err(server_error(&row));
                    }
                }
            }
            None => Err(UnitOfWorkError::Malformed("Empty packet".to_string())),
        }
    }

    async fn send_command(&mut self, payload: &[u8]) -> Result<(), UnitOfWorkError> {
        self.write_buf.clear();
        wire::write_frame(&mut self.write_buf, 0, payload);
        let out = self.write_buf.split();
        self.flush_out(&out).await
    }

    async fn flush_out(&mut self, data: &[u8]) -> Result<(), UnitOfWorkError> {
        self.stream
            .write_all(data)
            .await
            .map_err(UnitOfWorkError::ConnectionLost)?;
        self.stream
            .flush()
            .await
            .map_err(UnitOfWorkError::ConnectionLost)
    }

    async fn read_reply(&mut self) -> Result<Vec<u8>, UnitOfWorkError> {
        let (payload, _) = read_packet(&mut self.stream, &mut self.buffer)
            .await
            .map_err(io_to_work)?;
        Ok(payload)
    }
}

/// Read one framed packet, filling the buffer from the stream as needed
async fn read_packet(stream: &mut Stream, buffer: &mut BytesMut) -> io::Result<(Vec<u8>, u8)> {
    loop {
        if buffer.len() >= 4 {
            let header = [buffer[0], buffer[1], buffer[2], buffer[3]];
            let (len, seq) = wire::parse_frame_header(&header);
            if buffer.len() >= 4 + len {
                buffer.advance(4);
                let payload = buffer.split_to(len).to_vec();
                return Ok((payload, seq));
            }
        }
        let n = stream.read_buf(buffer).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Connection closed by server",
            ));
        }
    }
}

async fn write_flush(stream: &mut Stream, data: &[u8]) -> Result<(), ProvisioningError> {
    stream
        .write_all(data)
        .await
        .map_err(|e| ProvisioningError::Rejected(format!("Write failed: {}", e)))?;
    stream
        .flush()
        .await
        .map_err(|e| ProvisioningError::Rejected(format!("Write failed: {}", e)))
}

/// Drive the post-response authentication exchange to ReadyForQuery
/// (an OK packet in this protocol)
async fn authenticate(
    stream: &mut Stream,
    buffer: &mut BytesMut,
    opts: &ConnectOptions,
    handshake: &ServerHandshake,
) -> Result<(), ProvisioningError> {
    loop {
        let (payload, seq) = read_packet(stream, buffer).await.map_err(|e| {
            ProvisioningError::ConnectFailed {
                host: opts.host.clone(),
                port: opts.port,
                source: e,
            }
        })?;

        match payload.first() {
            Some(&wire::OK_HEADER) => return Ok(()),
            Some(&wire::ERR_HEADER) => {
                let err = ErrPacket::parse(&payload)
                    .map_err(|e| ProvisioningError::Rejected(e.to_string()))?;
                return Err(match err.code {
                    1044 | 1045 | 1049 => ProvisioningError::AuthFailed {
                        user: opts.user.clone(),
                        message: err.message,
                    },
                    _ => ProvisioningError::Rejected(format!("{} ({})", err.message, err.code)),
                });
            }
            // AuthSwitchRequest: plugin name and a fresh seed
            Some(&wire::EOF_HEADER) if payload.len() > 1 => {
                let body = &payload[1..];
                let nul = body.iter().position(|&b| b == 0).unwrap_or(body.len());
                let plugin = String::from_utf8_lossy(&body[..nul]);
                if plugin != wire::NATIVE_PASSWORD_PLUGIN {
                    return Err(ProvisioningError::AuthFailed {
                        user: opts.user.clone(),
                        message: format!("Unsupported auth plugin: {}", plugin),
                    });
                }
                let rest = body.get(nul + 1..).unwrap_or(&[]);
                let seed = rest.strip_suffix(&[0]).unwrap_or(rest);
                let auth = wire::scramble_native_password(seed, &opts.password);
                let mut out = BytesMut::new();
                wire::write_frame(&mut out, seq.wrapping_add(1), &auth);
                write_flush(stream, &out).await?;
            }
            // caching_sha2_password fast-auth marker
            Some(&wire::MORE_DATA_HEADER) => match payload.get(1) {
                Some(&3) => continue,
                _ => {
                    return Err(ProvisioningError::AuthFailed {
                        user: opts.user.clone(),
                        message: format!(
                            "{} full authentication is not supported; \
                             configure mysql_native_password",
                            handshake.auth_plugin
                        ),
                    });
                }
            },
            _ => {
                return Err(ProvisioningError::Rejected(
                    "Unexpected packet during authentication".to_string(),
                ));
            }
        }
    }
}

async fn upgrade_tls(stream: Stream, opts: &ConnectOptions) -> Result<Stream, ProvisioningError> {
    use tokio_rustls::rustls::pki_types::ServerName;
    use tokio_rustls::TlsConnector;

    let Stream::Tcp(tcp) = stream else {
        return Err(ProvisioningError::TlsFailed(
            "Stream already upgraded".to_string(),
        ));
    };

    let config = opts.tls.client_config().map_err(ProvisioningError::TlsFailed)?;
    let connector = TlsConnector::from(Arc::new(config));

    let sni_host = opts.tls.sni.clone().unwrap_or_else(|| opts.host.clone());
    let server_name = ServerName::try_from(sni_host)
        .map_err(|_| ProvisioningError::TlsFailed("Invalid hostname for TLS".to_string()))?;

    let tls_stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| ProvisioningError::TlsFailed(e.to_string()))?;

    Ok(Stream::Tls(Box::new(tls_stream)))
}

fn server_error(payload: &[u8]) -> UnitOfWorkError {
    match ErrPacket::parse(payload) {
        Ok(err) => UnitOfWorkError::Server {
            code: err.code,
            message: err.message,
        },
        Err(e) => UnitOfWorkError::Malformed(e.to_string()),
    }
}

fn expect_ok(payload: &[u8]) -> Result<(), UnitOfWorkError> {
    match payload.first() {
        Some(&wire::OK_HEADER) => {
            OkPacket::parse(payload).map_err(io_to_work)?;
            Ok(())
        }
        Some(&wire::ERR_HEADER) => Err(server_error(payload)),
        _ => Err(UnitOfWorkError::Malformed(
            "Expected OK packet".to_string(),
        )),
    }
}

fn io_to_work(e: io::Error) -> UnitOfWorkError {
    if e.kind() == io::ErrorKind::InvalidData {
        UnitOfWorkError::Malformed(e.to_string())
    } else {
        UnitOfWorkError::ConnectionLost(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::VariantKind;

    // These tests require a running MariaDB/MySQL server on localhost
    // with an empty-password root account; they are ignored by default.

    fn local_opts() -> ConnectOptions {
        ConnectOptions {
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: String::new(),
            database: String::new(),
            connect_timeout: Duration::from_secs(5),
            tls: TlsConfig::default(),
        }
    }

    #[tokio::test]
    #[ignore]
    async fn test_connect_and_ping() {
        let variant = VariantKind::Text.settings(TransportSecurity::Disabled);
        let mut conn = Connection::connect(&local_opts(), variant)
            .await
            .expect("Failed to connect");
        conn.ping().await.expect("Ping failed");
        conn.shutdown().await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_text_and_binary_execution() {
        for kind in [VariantKind::Text, VariantKind::Binary] {
            let variant = kind.settings(TransportSecurity::Disabled);
            let mut conn = Connection::connect(&local_opts(), variant)
                .await
                .expect("Failed to connect");
            conn.execute_discard("DO 1").await.expect("DO 1 failed");
            conn.execute_discard("SELECT 1").await.expect("SELECT 1 failed");
            conn.shutdown().await;
        }
    }
}
