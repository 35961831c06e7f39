//! Shared helpers for the publisher and subscriber integration tests.

#![allow(dead_code)]

pub mod fake_broker;

use std::time::Duration;

use beacon_envelope::Envelope;
use beacon_messaging_nats::{PublisherConfig, RetryPolicy, SubscriberConfig};
use serde::{Deserialize, Serialize};

/// Payload used by most tests.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct DeviceCreated {
    pub device_id: String,
}

pub fn device_created(device_id: &str) -> Envelope {
    Envelope::builder("cloud.beacontower.device.created", "/devices")
        .data_json(&DeviceCreated {
            device_id: device_id.to_string(),
        })
        .build()
        .expect("valid envelope")
}

pub fn event(event_type: &str, device_id: &str) -> Envelope {
    Envelope::builder(event_type, "/devices")
        .data_json(&DeviceCreated {
            device_id: device_id.to_string(),
        })
        .build()
        .expect("valid envelope")
}

pub fn publisher_config() -> PublisherConfig {
    PublisherConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(20),
        },
        ..Default::default()
    }
}

pub fn subscriber_config(service_name: &str) -> SubscriberConfig {
    SubscriberConfig {
        service_name: service_name.to_string(),
        resubscribe_delay: Duration::from_millis(10),
        ..Default::default()
    }
}

/// Polls `condition` until it holds, panicking after two seconds.
pub async fn wait_until<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let polled = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    assert!(polled.is_ok(), "timed out waiting for {what}");
}
