//! Client orchestrator: transport → Modbus → parser → device state.
//!
//! The client is synchronous and single-threaded per instance; concurrent
//! use goes through [`crate::client_async::AsyncClient`], which serializes
//! access. Transport faults are retried per the configured policy;
//! protocol and parser errors fail fast.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Error, ParserError, TransportError};
use crate::modbus::{ModbusRtu, ProtocolLayer};
use crate::parser::BlockParser;
use crate::profile::DeviceProfile;
use crate::record::ParsedRecord;
use crate::registry::SchemaRegistry;
use crate::retry::RetryPolicy;
use crate::schema::BlockSchema;
use crate::state::{BlockGroup, DeviceState};
use crate::transport::Transport;
use crate::value::Value;

/// Default per-request response timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of [`Client::read_group_ex`]: successful records plus
/// structured errors keyed by block id.
#[derive(Debug, Default)]
pub struct ReadGroupResult {
    pub blocks: Vec<ParsedRecord>,
    pub errors: BTreeMap<u16, Error>,
}

impl ReadGroupResult {
    /// Every block in the group was read.
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Some blocks failed but at least one succeeded.
    pub fn partial(&self) -> bool {
        !self.success() && !self.blocks.is_empty()
    }
}

/// Builder for [`Client`]; every knob has a sensible default.
pub struct ClientBuilder {
    transport: Box<dyn Transport>,
    profile: DeviceProfile,
    protocol: Box<dyn ProtocolLayer>,
    device_address: u8,
    request_timeout: Duration,
    retry_policy: RetryPolicy,
    registry: Option<SchemaRegistry>,
    parser: Option<BlockParser>,
}

impl ClientBuilder {
    pub fn device_address(mut self, address: u8) -> Self {
        self.device_address = address;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Use a custom schema registry instead of the built-in catalog.
    pub fn registry(mut self, registry: SchemaRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn protocol(mut self, protocol: Box<dyn ProtocolLayer>) -> Self {
        self.protocol = protocol;
        self
    }

    /// Use a pre-seeded parser (plugins register their schema pack before
    /// handing the parser over). Profile schemas are still auto-registered
    /// on top; blocks the parser already knows are skipped.
    pub fn parser(mut self, parser: BlockParser) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn build(self) -> Client {
        let registry = self.registry.unwrap_or_else(SchemaRegistry::with_builtins);
        let device_id = format!("{}_{}", self.profile.model, self.device_address);
        let state = DeviceState::new(&device_id, &self.profile.model, crate::PROTOCOL_VERSION);

        let mut client = Client {
            transport: self.transport,
            protocol: self.protocol,
            profile: self.profile,
            device_address: self.device_address,
            request_timeout: self.request_timeout,
            retry_policy: self.retry_policy,
            registry,
            parser: self.parser.unwrap_or_default(),
            state,
        };
        client.auto_register_schemas();
        client
    }
}

pub struct Client {
    transport: Box<dyn Transport>,
    protocol: Box<dyn ProtocolLayer>,
    profile: DeviceProfile,
    device_address: u8,
    request_timeout: Duration,
    retry_policy: RetryPolicy,
    registry: SchemaRegistry,
    parser: BlockParser,
    state: DeviceState,
}

impl Client {
    pub fn builder(transport: Box<dyn Transport>, profile: DeviceProfile) -> ClientBuilder {
        ClientBuilder {
            transport,
            profile,
            protocol: Box::new(ModbusRtu),
            device_address: 1,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry_policy: RetryPolicy::default(),
            registry: None,
            parser: None,
        }
    }

    /// Client with default options and the built-in schema catalog.
    pub fn new(transport: Box<dyn Transport>, profile: DeviceProfile) -> Self {
        Self::builder(transport, profile).build()
    }

    /// Resolve every block in the profile's groups and register the
    /// schemas with the parser. Missing schemas are logged, not fatal:
    /// those blocks simply cannot be read later.
    fn auto_register_schemas(&mut self) {
        let block_ids = self.profile.all_blocks();
        if block_ids.is_empty() {
            warn!(model = %self.profile.model, "device profile has no blocks defined");
            return;
        }

        let resolved = match self.registry.resolve_blocks(&block_ids, false) {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!(error = %err, "failed to resolve profile schemas");
                return;
            }
        };

        let missing: Vec<u16> = block_ids
            .iter()
            .copied()
            .filter(|id| !resolved.contains_key(id))
            .collect();
        if !missing.is_empty() {
            warn!(
                ?missing,
                available = ?self.registry.list_blocks(),
                "schemas not found for profile blocks; these blocks cannot be parsed"
            );
        }

        for (block_id, schema) in resolved {
            if self.parser.get_schema(block_id).is_some() {
                continue;
            }
            if let Err(err) = self.parser.register_schema(schema) {
                warn!(block_id, error = %err, "schema registration skipped");
            }
        }
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn device_id(&self) -> &str {
        self.state.device_id()
    }

    pub fn device_address(&self) -> u8 {
        self.device_address
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Connect the transport, retrying transient failures.
    pub fn connect(&mut self) -> Result<(), Error> {
        info!(model = %self.profile.model, "connecting");
        let transport = &mut self.transport;
        with_retry(&self.retry_policy, "connect", || {
            transport.connect()?;
            if !transport.is_connected() {
                return Err(Error::Transport(TransportError::Connect(
                    "transport reports not connected".to_string(),
                )));
            }
            Ok(())
        })
    }

    pub fn disconnect(&mut self) -> Result<(), Error> {
        info!(model = %self.profile.model, "disconnecting");
        self.transport.disconnect().map_err(Error::from)
    }

    /// Read and parse one block.
    ///
    /// When `register_count` is absent it is derived from the registered
    /// schema's minimum length. Transport faults are retried; the parsed
    /// record also updates the device state before being returned.
    pub fn read_block(
        &mut self,
        block_id: u16,
        register_count: Option<u16>,
    ) -> Result<ParsedRecord, Error> {
        let count = match register_count {
            Some(count) => count,
            None => self
                .parser
                .get_schema(block_id)
                .map(|schema| schema.register_count())
                .ok_or(Error::Parser(ParserError::UnknownBlock(block_id)))?,
        };

        let request = self
            .protocol
            .build_request(self.device_address, block_id, count);
        debug!(block_id, registers = count, "reading block");

        let response = {
            let transport = &mut self.transport;
            let timeout = self.request_timeout;
            with_retry(
                &self.retry_policy,
                &format!("read block {block_id}"),
                || transport.send_frame(&request, timeout).map_err(Error::from),
            )?
        };

        let payload = self.protocol.decode_response(&response)?;
        debug!(block_id, payload_len = payload.len(), "normalized payload");

        let record =
            self.parser
                .parse_block(block_id, &payload, true, self.state.protocol_version())?;
        for warning in &record.validation.warnings {
            warn!(block_id, %warning, "block warning");
        }

        self.state.update_from_block(&record);
        debug!(
            block_id,
            name = %record.name,
            fields = record.values.len(),
            "block parsed"
        );
        Ok(record)
    }

    fn group_blocks(&self, group: BlockGroup) -> Result<Vec<u16>, Error> {
        self.profile
            .group(group.as_str())
            .map(|def| def.blocks.clone())
            .ok_or_else(|| {
                Error::Device(crate::error::DeviceError::UnsupportedGroup(
                    group.as_str().to_string(),
                ))
            })
    }

    /// Read a block group in declaration order.
    ///
    /// With `partial_ok` failures are logged and skipped; otherwise the
    /// first failure aborts.
    pub fn read_group(
        &mut self,
        group: BlockGroup,
        partial_ok: bool,
    ) -> Result<Vec<ParsedRecord>, Error> {
        let mut blocks = Vec::new();
        for block_id in self.group_blocks(group)? {
            match self.read_block(block_id, None) {
                Ok(record) => blocks.push(record),
                Err(err) if partial_ok => {
                    warn!(%group, block_id, error = %err, "skipping failed block");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(blocks)
    }

    /// Like [`Client::read_group`], but returns structured errors keyed by
    /// block id instead of dropping them.
    pub fn read_group_ex(
        &mut self,
        group: BlockGroup,
        partial_ok: bool,
    ) -> Result<ReadGroupResult, Error> {
        let mut result = ReadGroupResult::default();
        for block_id in self.group_blocks(group)? {
            match self.read_block(block_id, None) {
                Ok(record) => result.blocks.push(record),
                Err(err) if partial_ok => {
                    result.errors.insert(block_id, err);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(result)
    }

    /// Lazy variant of [`Client::read_group`]: records are read as the
    /// iterator is advanced.
    pub fn stream_group(
        &mut self,
        group: BlockGroup,
        partial_ok: bool,
    ) -> Result<BlockStream<'_>, Error> {
        let blocks = self.group_blocks(group)?;
        Ok(BlockStream {
            client: self,
            blocks: blocks.into_iter(),
            partial_ok,
            done: false,
        })
    }

    pub fn get_state(&self) -> BTreeMap<String, Value> {
        self.state.get_state()
    }

    /// Mutable access to the device-state container, for plugin handler
    /// loaders and tests.
    pub fn state_mut(&mut self) -> &mut DeviceState {
        &mut self.state
    }

    pub fn get_group_state(&self, group: BlockGroup) -> BTreeMap<String, Value> {
        self.state.get_group_state(group)
    }

    /// Register a schema with both the client's registry and its parser.
    pub fn register_schema(&mut self, schema: std::sync::Arc<BlockSchema>) -> Result<(), Error> {
        self.registry.register(std::sync::Arc::clone(&schema))?;
        self.parser.register_schema(schema)?;
        Ok(())
    }

    /// Whether the underlying transport can deliver unsolicited data.
    pub fn supports_push(&self) -> bool {
        self.transport.supports_push()
    }

    /// Register a push callback on the transport. No-op for pull-only
    /// transports.
    pub fn set_push_callback(&mut self, callback: crate::transport::PushCallback) {
        self.transport.set_on_data(callback);
    }

    pub fn available_groups(&self) -> Vec<String> {
        self.profile.groups.keys().cloned().collect()
    }

    pub fn registered_schemas(&self) -> BTreeMap<u16, String> {
        self.parser.list_schemas()
    }
}

/// Blocks of a group, read lazily. `partial_ok` skips failed blocks;
/// otherwise the first error is yielded and the stream fuses.
pub struct BlockStream<'a> {
    client: &'a mut Client,
    blocks: std::vec::IntoIter<u16>,
    partial_ok: bool,
    done: bool,
}

impl Iterator for BlockStream<'_> {
    type Item = Result<ParsedRecord, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let block_id = self.blocks.next()?;
            match self.client.read_block(block_id, None) {
                Ok(record) => return Some(Ok(record)),
                Err(err) if self.partial_ok => {
                    warn!(block_id, error = %err, "skipping failed block in stream");
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

/// Closed retry loop: attempt, sleep on transport error, re-raise anything
/// else immediately. After `max_attempts` transport failures the last
/// error is returned.
fn with_retry<T>(
    policy: &RetryPolicy,
    operation: &str,
    mut f: impl FnMut() -> Result<T, Error>,
) -> Result<T, Error> {
    let mut last: Option<Error> = None;
    let mut attempt = 0u32;
    let delays = std::iter::once(Duration::ZERO).chain(policy.delays());

    for delay in delays {
        attempt += 1;
        if !delay.is_zero() {
            info!(
                operation,
                attempt,
                max_attempts = policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "retrying after transport error"
            );
            std::thread::sleep(delay);
        }
        match f() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retriable() => {
                warn!(operation, attempt, error = %err, "transport error");
                last = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    warn!(
        operation,
        attempts = policy.max_attempts,
        "all retry attempts exhausted"
    );
    Err(last.unwrap_or_else(|| {
        Error::Transport(TransportError::Io("retry loop made no attempts".to_string()))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap as Map, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    use crate::datatypes::DataType;
    use crate::modbus;
    use crate::profile::{BlockGroupDef, DeviceProfile};
    use crate::schema::Field;
    use crate::transform::Transform;

    /// Transport driven by a scripted queue of responses.
    struct ScriptedTransport {
        connected: bool,
        responses: Arc<Mutex<VecDeque<Result<Vec<u8>, TransportError>>>>,
        send_calls: Arc<AtomicUsize>,
    }

    impl ScriptedTransport {
        fn new(
            responses: Vec<Result<Vec<u8>, TransportError>>,
        ) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    connected: false,
                    responses: Arc::new(Mutex::new(responses.into())),
                    send_calls: Arc::clone(&calls),
                },
                calls,
            )
        }
    }

    impl Transport for ScriptedTransport {
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
            self.send_calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front()
                .unwrap_or(Err(TransportError::NotConnected))
        }
    }

    fn grid_registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry
            .register(Arc::new(
                BlockSchema::builder(1300, "INV_GRID_INFO")
                    .min_length(2)
                    .strict(false)
                    .field(
                        Field::new("frequency", 0, DataType::UInt16)
                            .with_transform([Transform::Scale(0.1)])
                            .with_unit("Hz"),
                    )
                    .build()
                    .expect("schema"),
            ))
            .expect("register");
        registry
    }

    fn grid_profile() -> DeviceProfile {
        DeviceProfile {
            model: "ES1100".into(),
            type_id: "31".into(),
            protocol: "v2".into(),
            description: "test profile".into(),
            groups: Map::from([(
                "grid".to_string(),
                BlockGroupDef::new(vec![1300], "grid input", 5),
            )]),
        }
    }

    fn grid_response() -> Vec<u8> {
        // freq register = 500 -> 50.0 Hz
        let mut frame = vec![0x01, 0x03, 0x02, 0x01, 0xF4];
        modbus::append_crc(&mut frame);
        frame
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(10),
            2.0,
            Duration::from_secs(1),
        )
        .expect("policy")
    }

    #[test]
    fn read_block_full_pipeline() {
        let (transport, _) = ScriptedTransport::new(vec![Ok(grid_response())]);
        let mut client = Client::builder(Box::new(transport), grid_profile())
            .registry(grid_registry())
            .build();

        let record = client.read_block(1300, None).expect("read");
        assert_eq!(record.values["frequency"], Value::Float(50.0));

        // Device state was updated through the grid mapper.
        assert_eq!(client.get_state()["grid_frequency"], Value::Float(50.0));
        assert_eq!(
            client.get_group_state(BlockGroup::Grid)["grid_frequency"],
            Value::Float(50.0)
        );
    }

    #[test]
    fn retry_exhaustion_counts_attempts_and_sleeps() {
        let (transport, calls) = ScriptedTransport::new(vec![
            Err(TransportError::Timeout(Duration::from_millis(1))),
            Err(TransportError::Timeout(Duration::from_millis(1))),
            Err(TransportError::Timeout(Duration::from_millis(1))),
        ]);
        let mut client = Client::builder(Box::new(transport), grid_profile())
            .registry(grid_registry())
            .retry_policy(fast_policy(3))
            .build();

        let started = Instant::now();
        let err = client.read_block(1300, None).unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Sleeps: 10ms + 20ms between the three attempts.
        assert!(elapsed >= Duration::from_millis(30), "elapsed {elapsed:?}");
    }

    #[test]
    fn protocol_errors_are_not_retried() {
        let mut bad_frame = grid_response();
        let last = bad_frame.len() - 1;
        bad_frame[last] ^= 0xFF;

        let (transport, calls) = ScriptedTransport::new(vec![Ok(bad_frame)]);
        let mut client = Client::builder(Box::new(transport), grid_profile())
            .registry(grid_registry())
            .retry_policy(fast_policy(3))
            .build();

        let err = client.read_block(1300, None).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn transient_then_success_recovers() {
        let (transport, calls) = ScriptedTransport::new(vec![
            Err(TransportError::Timeout(Duration::from_millis(1))),
            Ok(grid_response()),
        ]);
        let mut client = Client::builder(Box::new(transport), grid_profile())
            .registry(grid_registry())
            .retry_policy(fast_policy(3))
            .build();

        let record = client.read_block(1300, None).expect("read");
        assert_eq!(record.values["frequency"], Value::Float(50.0));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn missing_schema_without_register_count_fails() {
        let (transport, _) = ScriptedTransport::new(vec![]);
        let mut client = Client::builder(Box::new(transport), grid_profile())
            .registry(SchemaRegistry::new())
            .build();

        assert!(matches!(
            client.read_block(1300, None),
            Err(Error::Parser(ParserError::UnknownBlock(1300)))
        ));
    }

    #[test]
    fn read_group_partial_ok_keeps_going() {
        // Two blocks: 1300 (registered) fails on transport, then nothing
        // left in the script for the second read.
        let mut profile = grid_profile();
        profile
            .groups
            .get_mut("grid")
            .expect("group")
            .blocks
            .push(1300);

        let (transport, _) = ScriptedTransport::new(vec![
            Err(TransportError::NotConnected),
            Ok(grid_response()),
        ]);
        let mut client = Client::builder(Box::new(transport), profile)
            .registry(grid_registry())
            .retry_policy(fast_policy(1))
            .build();

        let blocks = client.read_group(BlockGroup::Grid, true).expect("group");
        assert_eq!(blocks.len(), 1);

        let err = client.read_group(BlockGroup::Battery, true).unwrap_err();
        assert!(matches!(err, Error::Device(_)));
    }

    #[test]
    fn read_group_ex_collects_structured_errors() {
        let mut profile = grid_profile();
        profile
            .groups
            .get_mut("grid")
            .expect("group")
            .blocks
            .push(1300);

        let (transport, _) = ScriptedTransport::new(vec![
            Ok(grid_response()),
            Err(TransportError::NotConnected),
        ]);
        let mut client = Client::builder(Box::new(transport), profile)
            .registry(grid_registry())
            .retry_policy(fast_policy(1))
            .build();

        let result = client.read_group_ex(BlockGroup::Grid, true).expect("group");
        assert_eq!(result.blocks.len(), 1);
        assert_eq!(result.errors.len(), 1);
        assert!(!result.success());
        assert!(result.partial());
    }

    #[test]
    fn stream_group_yields_lazily() {
        let (transport, calls) = ScriptedTransport::new(vec![Ok(grid_response())]);
        let mut client = Client::builder(Box::new(transport), grid_profile())
            .registry(grid_registry())
            .build();

        let mut stream = client.stream_group(BlockGroup::Grid, true).expect("stream");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let record = stream.next().expect("item").expect("record");
        assert_eq!(record.block_id, 1300);
        assert!(stream.next().is_none());
    }

    #[test]
    fn connect_retries_then_succeeds() {
        struct FlakyTransport {
            failures_left: u32,
            connected: bool,
        }
        impl Transport for FlakyTransport {
            fn connect(&mut self) -> Result<(), TransportError> {
                if self.failures_left > 0 {
                    self.failures_left -= 1;
                    return Err(TransportError::Connect("broker unreachable".into()));
                }
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
                Err(TransportError::NotConnected)
            }
        }

        let transport = FlakyTransport {
            failures_left: 2,
            connected: false,
        };
        let mut client = Client::builder(Box::new(transport), grid_profile())
            .registry(grid_registry())
            .retry_policy(fast_policy(3))
            .build();

        client.connect().expect("connect");
        assert!(client.is_connected());
        client.disconnect().expect("disconnect");
        assert!(!client.is_connected());
    }

    #[test]
    fn register_schema_reaches_parser_and_registry() {
        let (transport, _) = ScriptedTransport::new(vec![]);
        let mut client = Client::builder(Box::new(transport), grid_profile())
            .registry(grid_registry())
            .build();

        let schema = Arc::new(
            BlockSchema::builder(6000, "PACK_MAIN_INFO")
                .min_length(2)
                .field(Field::new("soc", 0, DataType::UInt16))
                .build()
                .expect("schema"),
        );
        client.register_schema(schema).expect("register");
        assert!(client.registered_schemas().contains_key(&6000));
    }
}
