//! librdkafka-backed `KafkaBroker` (feature `kafka`).

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info};

use crate::adapters::events::sync::{read, write};
use crate::ports::{BrokerError, ConsumedRecord, KafkaBroker, KafkaRecord, TopicSpec};

#[derive(Debug, Clone)]
pub struct RdKafkaSettings {
    /// Comma separated `host:port` list.
    pub brokers: String,
    pub client_id: String,
    pub group_id: String,
    pub send_timeout: Duration,
    pub metadata_timeout: Duration,
}

struct Clients {
    producer: FutureProducer,
    consumer: Arc<StreamConsumer>,
    admin: AdminClient<DefaultClientContext>,
}

pub struct RdKafkaBroker {
    settings: RdKafkaSettings,
    clients: RwLock<Option<Arc<Clients>>>,
}

fn map_error(err: KafkaError) -> BrokerError {
    match err.rdkafka_error_code() {
        Some(RDKafkaErrorCode::UnknownTopicOrPartition | RDKafkaErrorCode::UnknownTopic) => {
            BrokerError::UnknownTopic(err.to_string())
        }
        Some(
            RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::BrokerTransportFailure
            | RDKafkaErrorCode::BrokerNotAvailable
            | RDKafkaErrorCode::NetworkException
            | RDKafkaErrorCode::MessageTimedOut
            | RDKafkaErrorCode::OperationTimedOut
            | RDKafkaErrorCode::RequestTimedOut,
        ) => BrokerError::Unavailable(err.to_string()),
        _ => match err {
            KafkaError::ClientCreation(_) | KafkaError::MetadataFetch(_) => {
                BrokerError::Unavailable(err.to_string())
            }
            other => BrokerError::Rejected(other.to_string()),
        },
    }
}

impl RdKafkaBroker {
    pub fn new(settings: RdKafkaSettings) -> Self {
        Self {
            settings,
            clients: RwLock::new(None),
        }
    }

    fn base_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.settings.brokers)
            .set("client.id", &self.settings.client_id);
        config
    }

    fn clients(&self) -> Result<Arc<Clients>, BrokerError> {
        read(&self.clients)
            .clone()
            .ok_or_else(|| BrokerError::Unavailable("Kafka clients not connected".to_string()))
    }

    fn build_clients(&self) -> Result<Clients, BrokerError> {
        let producer: FutureProducer = self
            .base_config()
            .set(
                "message.timeout.ms",
                self.settings.send_timeout.as_millis().to_string(),
            )
            .create()
            .map_err(map_error)?;

        let consumer: StreamConsumer = self
            .base_config()
            .set("group.id", &self.settings.group_id)
            .set("auto.offset.reset", "latest")
            .set("enable.auto.commit", "true")
            .create()
            .map_err(map_error)?;

        let admin: AdminClient<DefaultClientContext> =
            self.base_config().create().map_err(map_error)?;

        Ok(Clients {
            producer,
            consumer: Arc::new(consumer),
            admin,
        })
    }
}

#[async_trait]
impl KafkaBroker for RdKafkaBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        let clients = self.build_clients()?;

        // Client creation never dials; a metadata round-trip proves the cluster is reachable.
        let producer = clients.producer.clone();
        let timeout = self.settings.metadata_timeout;
        let brokers = tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, timeout)
                .map(|metadata| metadata.brokers().len())
        })
        .await
        .map_err(|e| BrokerError::Unavailable(e.to_string()))?
        .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        *write(&self.clients) = Some(Arc::new(clients));
        info!(brokers, bootstrap = %self.settings.brokers, "Kafka clients connected");
        Ok(())
    }

    async fn ensure_topic(&self, spec: &TopicSpec) -> Result<(), BrokerError> {
        let clients = self.clients()?;
        let topic = NewTopic::new(
            &spec.name,
            spec.partitions,
            TopicReplication::Fixed(spec.replication_factor),
        );
        let results = clients
            .admin
            .create_topics(&[topic], &AdminOptions::new())
            .await
            .map_err(map_error)?;

        for result in results {
            match result {
                Ok(name) => debug!(topic = %name, "Kafka topic created"),
                Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {}
                Err((name, code)) => {
                    return Err(BrokerError::Rejected(format!(
                        "creating topic {} failed: {}",
                        name, code
                    )))
                }
            }
        }
        Ok(())
    }

    async fn send(&self, record: KafkaRecord) -> Result<(), BrokerError> {
        let clients = self.clients()?;
        let headers = record
            .headers
            .iter()
            .fold(OwnedHeaders::new(), |headers, (key, value)| {
                headers.insert(Header {
                    key: key.as_str(),
                    value: Some(value.as_str()),
                })
            });
        let future_record = FutureRecord::to(&record.topic)
            .key(&record.key)
            .payload(&record.payload)
            .headers(headers);

        clients
            .producer
            .send(future_record, Timeout::After(self.settings.send_timeout))
            .await
            .map(|_| ())
            .map_err(|(e, _)| map_error(e))
    }

    async fn subscribe(&self, topics: &[String]) -> Result<(), BrokerError> {
        let clients = self.clients()?;
        if topics.is_empty() {
            clients.consumer.unsubscribe();
            return Ok(());
        }
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        clients.consumer.subscribe(&topics).map_err(map_error)
    }

    async fn poll(&self, timeout: Duration) -> Result<Option<ConsumedRecord>, BrokerError> {
        let clients = self.clients()?;
        let message = match tokio::time::timeout(timeout, clients.consumer.recv()).await {
            Err(_) => return Ok(None),
            Ok(message) => message.map_err(map_error)?,
        };

        Ok(Some(ConsumedRecord {
            topic: message.topic().to_string(),
            key: message
                .key()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            payload: message
                .payload_view::<str>()
                .and_then(Result::ok)
                .map(str::to_string),
            partition: message.partition(),
            offset: message.offset(),
        }))
    }

    async fn disconnect(&self) {
        let clients = write(&self.clients).take();
        if let Some(clients) = clients {
            clients.consumer.unsubscribe();
        }
    }
}
