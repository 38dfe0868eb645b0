//! RESP2 client for a remote Redis-compatible store.
//!
//! Connections come from a bounded pool. A watch holds its connection for the
//! whole session because WATCH state lives on the server connection; dropping
//! the handle closes that connection, which clears the watch server-side.
//! Batches are pipelined as `MULTI`, the commands, `EXEC` in one write.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;

use super::command::{Command, ExecReply, ExecutionFault, ValidationFault};
use super::config::StoreConfig;
use super::errors::{StoreError, StoreResult};
use super::resp::{self, ParseResult, RespValue};
use super::{KeyValueStore, StoreFuture, WatchHandle};
use crate::observability::Logger;

const READ_CHUNK: usize = 4096;

/// One server connection with its read buffer
struct Connection {
    stream: TcpStream,
    buf: Vec<u8>,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl Connection {
    async fn dial(config: &StoreConfig) -> StoreResult<Self> {
        let stream = timeout(config.dial_timeout(), TcpStream::connect(&config.addr))
            .await
            .map_err(|_| StoreError::Timeout(config.dial_timeout_ms))??;
        stream.set_nodelay(true)?;

        let mut conn = Self {
            stream,
            buf: Vec::with_capacity(READ_CHUNK),
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
        };

        if !config.password.is_empty() {
            conn.call_ok(&["AUTH", &config.password]).await?;
        }
        if config.db != 0 {
            let db = config.db.to_string();
            conn.call_ok(&["SELECT", &db]).await?;
        }
        Ok(conn)
    }

    async fn write_frame(&mut self, frame: &[u8]) -> StoreResult<()> {
        timeout(self.write_timeout, self.stream.write_all(frame))
            .await
            .map_err(|_| StoreError::Timeout(self.write_timeout.as_millis() as u64))??;
        Ok(())
    }

    async fn read_reply(&mut self) -> StoreResult<RespValue> {
        loop {
            match resp::parse(&self.buf) {
                ParseResult::Complete(value, used) => {
                    self.buf.drain(..used);
                    return Ok(value);
                }
                ParseResult::Invalid(reason) => return Err(StoreError::Protocol(reason)),
                ParseResult::Incomplete => {}
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = timeout(self.read_timeout, self.stream.read(&mut chunk))
                .await
                .map_err(|_| StoreError::Timeout(self.read_timeout.as_millis() as u64))??;
            if n == 0 {
                return Err(StoreError::Unavailable("connection closed by server".to_string()));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    async fn call(&mut self, parts: &[&str]) -> StoreResult<RespValue> {
        self.write_frame(&resp::encode_command(parts)).await?;
        self.read_reply().await
    }

    /// Call a command whose only acceptable answer is `+OK`
    async fn call_ok(&mut self, parts: &[&str]) -> StoreResult<()> {
        match self.call(parts).await? {
            RespValue::Simple(s) if s == "OK" => Ok(()),
            RespValue::Error(msg) => Err(StoreError::Unavailable(format!("{}: {}", parts[0], msg))),
            other => Err(StoreError::Protocol(format!(
                "unexpected reply to {}: {:?}",
                parts[0], other
            ))),
        }
    }

    /// Pipeline `MULTI`, the commands and `EXEC`, then decode the outcome
    async fn transact(&mut self, commands: &[Command]) -> StoreResult<ExecReply> {
        let mut frame = resp::encode_command(&["MULTI"]);
        for command in commands {
            frame.extend_from_slice(&resp::encode_command(&command.to_wire()));
        }
        frame.extend_from_slice(&resp::encode_command(&["EXEC"]));
        self.write_frame(&frame).await?;

        match self.read_reply().await? {
            RespValue::Simple(s) if s == "OK" => {}
            other => {
                return Err(StoreError::Protocol(format!("unexpected reply to MULTI: {:?}", other)))
            }
        }

        let mut queue_fault = None;
        for (index, command) in commands.iter().enumerate() {
            match self.read_reply().await? {
                RespValue::Simple(s) if s == "QUEUED" => {}
                RespValue::Error(reason) => {
                    queue_fault.get_or_insert(ValidationFault {
                        index,
                        operation: command.operation,
                        reason,
                    });
                }
                other => {
                    return Err(StoreError::Protocol(format!(
                        "unexpected reply while queueing {}: {:?}",
                        command.operation, other
                    )))
                }
            }
        }

        let exec = self.read_reply().await?;
        decode_exec(exec, queue_fault, commands)
    }
}

/// Map the reply to `EXEC` onto the batch outcome
fn decode_exec(
    exec: RespValue,
    queue_fault: Option<ValidationFault>,
    commands: &[Command],
) -> StoreResult<ExecReply> {
    match exec {
        RespValue::Null => Ok(ExecReply::Conflict),
        RespValue::Error(msg) if msg.starts_with("EXECABORT") => match queue_fault {
            Some(fault) => Ok(ExecReply::Aborted(fault)),
            None => match commands.first() {
                Some(first) => Ok(ExecReply::Aborted(ValidationFault {
                    index: 0,
                    operation: first.operation,
                    reason: msg,
                })),
                None => Err(StoreError::Protocol(msg)),
            },
        },
        RespValue::Error(msg) => Err(StoreError::Rejected(msg)),
        RespValue::Array(items) if items.len() == commands.len() => Ok(ExecReply::Executed(
            items.into_iter().map(RespValue::into_command_reply).collect(),
        )),
        other => Err(StoreError::Protocol(format!(
            "unexpected reply to EXEC for {} commands: {:?}",
            commands.len(),
            other
        ))),
    }
}

/// Connection checked out of the pool
struct Lease {
    conn: Connection,
    _permit: OwnedSemaphorePermit,
}

struct Pool {
    config: StoreConfig,
    idle: Mutex<Vec<Connection>>,
    permits: Arc<Semaphore>,
}

impl Pool {
    async fn checkout(&self) -> StoreResult<Lease> {
        let permit = timeout(
            self.config.dial_timeout(),
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        .map_err(|_| StoreError::Timeout(self.config.dial_timeout_ms))?
        .map_err(|_| StoreError::Unavailable("connection pool closed".to_string()))?;

        let idle = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        let conn = match idle {
            Some(conn) => conn,
            None => Connection::dial(&self.config).await.map_err(|e| {
                Logger::warn(
                    "STORE_DIAL_FAILED",
                    &[("addr", &self.config.addr), ("error", &e.to_string())],
                );
                e
            })?,
        };
        Ok(Lease {
            conn,
            _permit: permit,
        })
    }

    /// Return a healthy connection. Only call when the connection is at a
    /// reply boundary; anything else must be dropped.
    fn checkin(&self, lease: Lease) {
        if let Ok(mut idle) = self.idle.lock() {
            idle.push(lease.conn);
        }
    }

    /// Return the connection after a call unless the error left it in an
    /// unknown state
    fn settle<T>(&self, lease: Lease, result: &StoreResult<T>) {
        match result {
            Err(e) if e.poisons_connection() => drop(lease),
            _ => self.checkin(lease),
        }
    }

    /// Run one command on a pooled connection
    async fn run(&self, parts: &[&str]) -> StoreResult<RespValue> {
        let mut lease = self.checkout().await?;
        let result = lease.conn.call(parts).await;
        self.settle(lease, &result);
        result
    }
}

/// Pooled client for a remote store
#[derive(Clone)]
pub struct RedisStore {
    pool: Arc<Pool>,
}

impl RedisStore {
    /// Build the pool, verify the server answers PING, and pre-dial
    /// `min_idle_conns` connections.
    pub async fn connect(config: StoreConfig) -> StoreResult<Self> {
        config.validate().map_err(StoreError::Unavailable)?;
        let permits = Arc::new(Semaphore::new(config.pool_size));
        let store = Self {
            pool: Arc::new(Pool {
                config,
                idle: Mutex::new(Vec::new()),
                permits,
            }),
        };

        store.ping().await?;

        let missing = {
            let idle = store.pool.idle.lock().map(|idle| idle.len()).unwrap_or(0);
            store.pool.config.min_idle_conns.saturating_sub(idle)
        };
        for _ in 0..missing {
            let conn = Connection::dial(&store.pool.config).await?;
            if let Ok(mut idle) = store.pool.idle.lock() {
                idle.push(conn);
            }
        }

        Logger::info(
            "STORE_CONNECTED",
            &[
                ("addr", &store.pool.config.addr),
                ("pool_size", &store.pool.config.pool_size.to_string()),
            ],
        );
        Ok(store)
    }

    /// Server address this client talks to
    pub fn addr(&self) -> &str {
        &self.pool.config.addr
    }

    /// Connections currently parked in the pool
    pub fn idle_connections(&self) -> usize {
        self.pool.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }
}

fn bulk_or_nil(reply: RespValue, op: &str) -> StoreResult<Option<String>> {
    match reply {
        RespValue::Bulk(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        RespValue::Null => Ok(None),
        RespValue::Error(msg) => Err(StoreError::Rejected(msg)),
        other => Err(StoreError::Protocol(format!("unexpected reply to {}: {:?}", op, other))),
    }
}

impl KeyValueStore for RedisStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move { bulk_or_nil(self.pool.run(&["GET", key]).await?, "GET") })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Option<Duration>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let command = Command::set(key, value, ttl);
            match self.pool.run(&command.to_wire()).await? {
                RespValue::Simple(_) => Ok(()),
                RespValue::Error(msg) => Err(StoreError::Rejected(msg)),
                other => Err(StoreError::Protocol(format!("unexpected reply to SET: {:?}", other))),
            }
        })
    }

    fn del<'a>(&'a self, keys: &'a [String]) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            if keys.is_empty() {
                return Ok(0);
            }
            let command = Command::del(keys.iter().cloned());
            match self.pool.run(&command.to_wire()).await? {
                RespValue::Integer(n) => Ok(n.max(0) as u64),
                RespValue::Error(msg) => Err(StoreError::Rejected(msg)),
                other => Err(StoreError::Protocol(format!("unexpected reply to DEL: {:?}", other))),
            }
        })
    }

    fn incr<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Result<i64, ExecutionFault>> {
        Box::pin(async move {
            match self.pool.run(&["INCR", key]).await? {
                RespValue::Integer(n) => Ok(Ok(n)),
                RespValue::Error(msg) => Ok(Err(ExecutionFault::from_message(msg))),
                other => Err(StoreError::Protocol(format!("unexpected reply to INCR: {:?}", other))),
            }
        })
    }

    fn lrange<'a>(&'a self, key: &'a str, start: i64, stop: i64) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            let (start, stop) = (start.to_string(), stop.to_string());
            match self.pool.run(&["LRANGE", key, &start, &stop]).await? {
                RespValue::Array(items) => items
                    .into_iter()
                    .map(|item| bulk_or_nil(item, "LRANGE").map(Option::unwrap_or_default))
                    .collect(),
                RespValue::Error(msg) => Err(StoreError::Rejected(msg)),
                other => Err(StoreError::Protocol(format!(
                    "unexpected reply to LRANGE: {:?}",
                    other
                ))),
            }
        })
    }

    fn execute<'a>(&'a self, commands: &'a [Command]) -> StoreFuture<'a, ExecReply> {
        Box::pin(async move {
            let mut lease = self.pool.checkout().await?;
            let result = lease.conn.transact(commands).await;
            self.pool.settle(lease, &result);
            result
        })
    }

    fn watch<'a>(&'a self, keys: &'a [String]) -> StoreFuture<'a, Box<dyn WatchHandle>> {
        Box::pin(async move {
            let mut lease = self.pool.checkout().await?;
            let mut parts = vec!["WATCH"];
            parts.extend(keys.iter().map(String::as_str));
            lease.conn.call_ok(&parts).await?;
            let handle: Box<dyn WatchHandle> = Box::new(RedisWatch {
                lease: Some(lease),
                pool: Arc::clone(&self.pool),
            });
            Ok(handle)
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            match self.pool.run(&["PING"]).await? {
                RespValue::Simple(s) if s == "PONG" => Ok(()),
                RespValue::Error(msg) => Err(StoreError::Unavailable(msg)),
                other => Err(StoreError::Protocol(format!("unexpected reply to PING: {:?}", other))),
            }
        })
    }
}

/// Watch bound to a dedicated connection
struct RedisWatch {
    lease: Option<Lease>,
    pool: Arc<Pool>,
}

impl RedisWatch {
    fn lease(&mut self) -> StoreResult<&mut Lease> {
        self.lease
            .as_mut()
            .ok_or_else(|| StoreError::Protocol("watch session already closed".to_string()))
    }
}

impl WatchHandle for RedisWatch {
    fn get<'a>(&'a mut self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let result = self.lease()?.conn.call(&["GET", key]).await;
            match result {
                Ok(reply) => bulk_or_nil(reply, "GET"),
                Err(e) => {
                    // Connection state unknown; closing it also clears the watch
                    self.lease = None;
                    Err(e)
                }
            }
        })
    }

    fn execute<'a>(&'a mut self, commands: &'a [Command]) -> StoreFuture<'a, ExecReply> {
        Box::pin(async move {
            let Some(mut lease) = self.lease.take() else {
                return Err(StoreError::Protocol("watch session already closed".to_string()));
            };
            let result = lease.conn.transact(commands).await;
            // EXEC always clears the watch, so the connection is clean again
            self.pool.settle(lease, &result);
            result
        })
    }

    fn release(&mut self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            if let Some(mut lease) = self.lease.take() {
                lease.conn.call_ok(&["UNWATCH"]).await?;
                self.pool.checkin(lease);
            }
            Ok(())
        })
    }
}
