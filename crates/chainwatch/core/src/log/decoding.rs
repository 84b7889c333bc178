//! Typed delivery of logs through registered decoders.

use super::{Broadcast, DecodeError, LogListener};
use alloy_primitives::{B256, map::HashMap};
use alloy_sol_types::SolEvent;
use async_trait::async_trait;
use chainwatch_types::{JobId, LogRecord};
use std::fmt;
use tracing::{trace, warn};

/// Receives logs decoded by a [`DecodingListener`].
#[async_trait]
pub trait DecodedLogListener: Send + Sync + fmt::Debug {
    /// Events this listener understands.
    type Event: Send;

    /// Called when the log subscription is established.
    fn on_connect(&self) {}

    /// Called when the log subscription is lost.
    fn on_disconnect(&self) {}

    /// Handles a confirmed log together with the result of decoding it.
    async fn handle_decoded_log(
        &self,
        broadcast: Broadcast,
        event: Result<Self::Event, DecodeError>,
    );

    /// Job owning the listener.
    fn job_id(&self) -> JobId;
}

type Decoder<E> = Box<dyn Fn(&LogRecord) -> Result<E, DecodeError> + Send + Sync>;

/// A [`LogListener`] decoding each log by its event id before handing it to `L`.
///
/// Logs whose event id has no registered decoder are marked consumed and dropped, so they are not
/// handed over again after a reorg.
pub struct DecodingListener<L: DecodedLogListener> {
    inner: L,
    decoders: HashMap<B256, Decoder<L::Event>>,
}

impl<L: DecodedLogListener> DecodingListener<L> {
    /// Wraps `inner` with no decoders registered.
    pub fn new(inner: L) -> Self {
        Self { inner, decoders: HashMap::default() }
    }

    /// Registers `decoder` for logs whose first topic is `event_id`.
    pub fn with_decoder<F>(mut self, event_id: B256, decoder: F) -> Self
    where
        F: Fn(&LogRecord) -> Result<L::Event, DecodeError> + Send + Sync + 'static,
    {
        self.decoders.insert(event_id, Box::new(decoder));
        self
    }

    /// Registers the ABI decoder of `T`, wrapping decoded events with `wrap`.
    pub fn with_sol_event<T>(self, wrap: fn(T) -> L::Event) -> Self
    where
        T: SolEvent + 'static,
    {
        self.with_decoder(T::SIGNATURE_HASH, move |log: &LogRecord| {
            let event = T::decode_raw_log(log.topics.iter().copied(), &log.data)?;
            Ok(wrap(event))
        })
    }

    /// Event ids with a registered decoder.
    pub fn event_ids(&self) -> impl Iterator<Item = &B256> {
        self.decoders.keys()
    }

    /// The wrapped listener.
    pub const fn inner(&self) -> &L {
        &self.inner
    }
}

impl<L: DecodedLogListener> fmt::Debug for DecodingListener<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodingListener")
            .field("inner", &self.inner)
            .field("decoders", &self.decoders.len())
            .finish()
    }
}

#[async_trait]
impl<L: DecodedLogListener> LogListener for DecodingListener<L> {
    fn on_connect(&self) {
        self.inner.on_connect();
    }

    fn on_disconnect(&self) {
        self.inner.on_disconnect();
    }

    async fn handle_log(&self, broadcast: Broadcast) {
        let Some(event_id) = broadcast.raw_log().event_id() else {
            trace!(target: "chainwatch::log_broadcaster", log = %broadcast.raw_log(), "Dropping log without event id");
            return drop_undecodable(&broadcast);
        };
        let Some(decoder) = self.decoders.get(&event_id) else {
            trace!(target: "chainwatch::log_broadcaster", %event_id, "Dropping log of unregistered event");
            return drop_undecodable(&broadcast);
        };

        let event = decoder(broadcast.raw_log());
        self.inner.handle_decoded_log(broadcast, event).await;
    }

    fn job_id(&self) -> JobId {
        self.inner.job_id()
    }
}

fn drop_undecodable(broadcast: &Broadcast) {
    if let Err(err) = broadcast.mark_consumed() {
        warn!(
            target: "chainwatch::log_broadcaster",
            %err,
            log = %broadcast.raw_log(),
            "Failed to mark dropped log consumed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{log, temp_db};
    use alloy_primitives::{Address, U256};
    use alloy_sol_types::sol;
    use std::sync::Mutex;

    sol! {
        event Transfer(address indexed from, address indexed to, uint256 value);
        event Approval(address indexed owner, address indexed spender, uint256 value);
    }

    #[derive(Debug, PartialEq, Eq)]
    enum TokenEvent {
        Transfer(U256),
        Approval(U256),
    }

    #[derive(Debug, Default)]
    struct Recorder {
        events: Mutex<Vec<Result<TokenEvent, String>>>,
    }

    #[async_trait]
    impl DecodedLogListener for Recorder {
        type Event = TokenEvent;

        async fn handle_decoded_log(
            &self,
            _broadcast: Broadcast,
            event: Result<TokenEvent, DecodeError>,
        ) {
            self.events.lock().unwrap().push(event.map_err(|err| err.to_string()));
        }

        fn job_id(&self) -> JobId {
            7
        }
    }

    fn encoded<E: SolEvent>(event: &E, index: u64) -> LogRecord {
        let data = event.encode_log_data();
        LogRecord {
            topics: data.topics().to_vec(),
            data: data.data.clone(),
            ..log(Address::repeat_byte(1), 3, 0, index)
        }
    }

    fn listener() -> DecodingListener<Recorder> {
        DecodingListener::new(Recorder::default())
            .with_sol_event::<Transfer>(|event| TokenEvent::Transfer(event.value))
    }

    #[tokio::test]
    async fn test_decodes_registered_events() {
        let (_dir, db) = temp_db();
        let listener = listener();
        assert_eq!(listener.job_id(), 7);

        let transfer =
            Transfer { from: Address::repeat_byte(2), to: Address::repeat_byte(3), value: U256::from(5) };
        listener.handle_log(Broadcast::new(encoded(&transfer, 0), 7, db)).await;

        assert_eq!(*listener.inner().events.lock().unwrap(), vec![Ok(TokenEvent::Transfer(U256::from(5)))]);
    }

    #[tokio::test]
    async fn test_drops_unregistered_events() {
        let (_dir, db) = temp_db();
        let listener = listener();

        let approval = Approval {
            owner: Address::repeat_byte(2),
            spender: Address::repeat_byte(3),
            value: U256::from(5),
        };
        let approval = Broadcast::new(encoded(&approval, 0), 7, db.clone());
        let no_topics = LogRecord { topics: vec![], ..log(Address::repeat_byte(1), 3, 0, 1) };
        let no_topics = Broadcast::new(no_topics, 7, db);
        assert!(!approval.was_already_consumed().unwrap());

        listener.handle_log(approval.clone()).await;
        listener.handle_log(no_topics.clone()).await;

        assert!(listener.inner().events.lock().unwrap().is_empty());
        assert!(approval.was_already_consumed().unwrap());
        assert!(no_topics.was_already_consumed().unwrap());
    }

    #[tokio::test]
    async fn test_reports_malformed_logs() {
        let (_dir, db) = temp_db();
        let listener = listener()
            .with_sol_event::<Approval>(|event| TokenEvent::Approval(event.value));
        assert_eq!(listener.event_ids().count(), 2);

        let mut malformed = encoded(
            &Transfer { from: Address::ZERO, to: Address::ZERO, value: U256::from(1) },
            0,
        );
        malformed.data = Default::default();
        listener.handle_log(Broadcast::new(malformed, 7, db)).await;

        let events = listener.inner().events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_err());
    }
}
