//! Async facade over the sync [`Client`].
//!
//! The sync client's contract is single-threaded use per instance. The
//! facade enforces it for async callers: every public method acquires a
//! per-instance async mutex, then runs the sync call on a blocking worker
//! thread. Concurrent calls on one facade are therefore serialized, never
//! overlapping inside the client.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::client::{Client, ReadGroupResult};
use crate::error::{DeviceError, Error};
use crate::record::ParsedRecord;
use crate::schema::BlockSchema;
use crate::state::BlockGroup;
use crate::value::Value;

pub struct AsyncClient {
    inner: Arc<Mutex<Client>>,
    op_lock: tokio::sync::Mutex<()>,
    device_id: String,
    model: String,
}

impl AsyncClient {
    pub fn new(client: Client) -> Self {
        let device_id = client.device_id().to_string();
        let model = client.profile().model.clone();
        Self {
            inner: Arc::new(Mutex::new(client)),
            op_lock: tokio::sync::Mutex::new(()),
            device_id,
            model,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Serialize and offload one sync client call.
    async fn run<T, F>(&self, f: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(&mut Client) -> Result<T, Error> + Send + 'static,
    {
        let _guard = self.op_lock.lock().await;
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut client = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&mut client)
        })
        .await
        .map_err(|err| {
            Error::Device(DeviceError::Internal(format!(
                "client worker task failed: {err}"
            )))
        })?
    }

    /// Connect, cleaning up with a best-effort disconnect if connecting
    /// fails partway.
    pub async fn connect(&self) -> Result<(), Error> {
        if let Err(err) = self.run(Client::connect).await {
            let _ = self.run(Client::disconnect).await;
            return Err(err);
        }
        Ok(())
    }

    /// Disconnect. Idempotent.
    pub async fn disconnect(&self) -> Result<(), Error> {
        self.run(Client::disconnect).await
    }

    pub async fn read_block(
        &self,
        block_id: u16,
        register_count: Option<u16>,
    ) -> Result<ParsedRecord, Error> {
        self.run(move |client| client.read_block(block_id, register_count))
            .await
    }

    pub async fn read_group(
        &self,
        group: BlockGroup,
        partial_ok: bool,
    ) -> Result<Vec<ParsedRecord>, Error> {
        self.run(move |client| client.read_group(group, partial_ok))
            .await
    }

    pub async fn read_group_ex(
        &self,
        group: BlockGroup,
        partial_ok: bool,
    ) -> Result<ReadGroupResult, Error> {
        self.run(move |client| client.read_group_ex(group, partial_ok))
            .await
    }

    pub async fn get_state(&self) -> Result<BTreeMap<String, Value>, Error> {
        self.run(|client| Ok(client.get_state())).await
    }

    pub async fn get_group_state(&self, group: BlockGroup) -> Result<BTreeMap<String, Value>, Error> {
        self.run(move |client| Ok(client.get_group_state(group)))
            .await
    }

    pub async fn register_schema(&self, schema: Arc<BlockSchema>) -> Result<(), Error> {
        self.run(move |client| client.register_schema(schema)).await
    }

    pub async fn available_groups(&self) -> Result<Vec<String>, Error> {
        self.run(|client| Ok(client.available_groups())).await
    }

    pub async fn registered_schemas(&self) -> Result<BTreeMap<u16, String>, Error> {
        self.run(|client| Ok(client.registered_schemas())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::datatypes::DataType;
    use crate::error::TransportError;
    use crate::modbus;
    use crate::profile::{BlockGroupDef, DeviceProfile};
    use crate::registry::SchemaRegistry;
    use crate::schema::{BlockSchema, Field};
    use crate::transport::Transport;

    /// Transport that asserts request/response calls never overlap.
    struct OverlapDetector {
        in_flight: Arc<AtomicUsize>,
        max_seen: Arc<AtomicUsize>,
        connected: bool,
    }

    impl Transport for OverlapDetector {
        fn connect(&mut self) -> Result<(), TransportError> {
            self.connected = true;
            Ok(())
        }
        fn disconnect(&mut self) -> Result<(), TransportError> {
            self.connected = false;
            Ok(())
        }
        fn is_connected(&self) -> bool {
            self.connected
        }
        fn send_frame(
            &mut self,
            _request: &[u8],
            _timeout: Duration,
        ) -> Result<Vec<u8>, TransportError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(10));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let mut frame = vec![0x01, 0x03, 0x02, 0x00, 0x64];
            modbus::append_crc(&mut frame);
            Ok(frame)
        }
    }

    fn test_client(in_flight: Arc<AtomicUsize>, max_seen: Arc<AtomicUsize>) -> Client {
        let mut registry = SchemaRegistry::new();
        registry
            .register(Arc::new(
                BlockSchema::builder(100, "APP_HOME_DATA")
                    .min_length(2)
                    .strict(false)
                    .field(Field::new("soc", 0, DataType::UInt16))
                    .build()
                    .expect("schema"),
            ))
            .expect("register");

        let profile = DeviceProfile {
            model: "ES1100".into(),
            type_id: "31".into(),
            protocol: "v2".into(),
            description: String::new(),
            groups: Map::from([(
                "core".to_string(),
                BlockGroupDef::new(vec![100], "dashboard", 5),
            )]),
        };

        Client::builder(
            Box::new(OverlapDetector {
                in_flight,
                max_seen,
                connected: false,
            }),
            profile,
        )
        .registry(registry)
        .build()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_calls_are_serialized() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let client = Arc::new(AsyncClient::new(test_client(
            Arc::clone(&in_flight),
            Arc::clone(&max_seen),
        )));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let client = Arc::clone(&client);
            handles.push(tokio::spawn(async move {
                client.read_block(100, None).await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("read");
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1, "client calls overlapped");
    }

    #[tokio::test]
    async fn connect_read_disconnect() {
        let client = AsyncClient::new(test_client(
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
        ));
        client.connect().await.expect("connect");
        let record = client.read_block(100, None).await.expect("read");
        assert_eq!(record.block_id, 100);
        let state = client.get_state().await.expect("state");
        assert!(state.contains_key("soc"));
        client.disconnect().await.expect("disconnect");
    }

    #[tokio::test]
    async fn groups_via_facade() {
        let client = AsyncClient::new(test_client(
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
        ));
        let records = client
            .read_group(BlockGroup::Core, true)
            .await
            .expect("group");
        assert_eq!(records.len(), 1);
        assert_eq!(client.available_groups().await.expect("groups"), vec!["core"]);
    }
}
