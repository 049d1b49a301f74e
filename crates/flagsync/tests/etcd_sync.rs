// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fast_config, init_tracing, wait_until, FlakyStore, StreamBreak};
use flagsync::{
	EtcdStore, EvaluationContext, FlagStore, FlagValue, FlagsClient, MemoryKv, SyncState,
};

async fn etcd_store() -> (Arc<MemoryKv>, Arc<EtcdStore>) {
	let kv = Arc::new(MemoryKv::new());
	let store = Arc::new(EtcdStore::new(kv.clone(), "flagsync"));
	(kv, store)
}

#[tokio::test]
async fn flag_changes_are_pushed_to_the_cache() {
	init_tracing();
	let (kv, store) = etcd_store().await;
	store.put("new-ui", &FlagValue::Boolean(true)).await.unwrap();

	let client = FlagsClient::builder()
		.config(fast_config())
		.kv_client(kv)
		.start()
		.await
		.unwrap();
	let ctx = EvaluationContext::new("user-42");
	assert!(client.is_enabled("new-ui", &ctx));

	store.put("new-ui", &FlagValue::Boolean(false)).await.unwrap();
	assert!(wait_until(|| !client.is_enabled("new-ui", &ctx)).await);

	store.put("checkout-v2", &FlagValue::Boolean(true)).await.unwrap();
	assert!(wait_until(|| client.is_enabled("checkout-v2", &ctx)).await);

	store.delete("checkout-v2").await.unwrap();
	assert!(wait_until(|| client.get_value("checkout-v2").is_none()).await);

	assert_eq!(client.state(), SyncState::Syncing);
	assert!(client.stats().events_applied >= 3);
	client.stop().await;
}

#[tokio::test]
async fn cached_flags_are_served_while_degraded() {
	init_tracing();
	let (kv, store) = etcd_store().await;
	store.put("new-ui", &FlagValue::Boolean(true)).await.unwrap();

	let client = FlagsClient::builder()
		.config(fast_config())
		.kv_client(kv.clone())
		.start()
		.await
		.unwrap();
	let ctx = EvaluationContext::new("user-42");

	kv.set_available(false);
	assert!(wait_until(|| client.state() == SyncState::Degraded).await);

	assert!(client.is_enabled("new-ui", &ctx));
	tokio::time::sleep(Duration::from_millis(30)).await;
	assert!(client.staleness().unwrap() >= Duration::from_millis(30));
	assert!(client.status().last_error.is_some());

	kv.set_available(true);
	assert!(wait_until(|| client.state() == SyncState::Syncing).await);
	assert_eq!(client.staleness(), None);
	assert!(client.stats().resyncs >= 1);

	store.put("new-ui", &FlagValue::Boolean(false)).await.unwrap();
	assert!(wait_until(|| !client.is_enabled("new-ui", &ctx)).await);
	client.stop().await;
}

#[tokio::test]
async fn delete_during_outage_is_removed_after_recovery() {
	init_tracing();
	let (_kv, etcd) = etcd_store().await;
	etcd.put("new-ui", &FlagValue::Boolean(true)).await.unwrap();
	etcd.put("keep", &FlagValue::Boolean(true)).await.unwrap();

	let flaky = Arc::new(FlakyStore::new(etcd.clone()));
	let client = FlagsClient::builder()
		.config(fast_config())
		.store(flaky.clone())
		.start()
		.await
		.unwrap();
	let ctx = EvaluationContext::anonymous();

	flaky.set_offline(true);
	flaky.break_streams(StreamBreak::Disconnect);
	assert!(wait_until(|| client.state() == SyncState::Degraded).await);

	etcd.delete("new-ui").await.unwrap();
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert!(client.is_enabled("new-ui", &ctx));

	flaky.set_offline(false);
	assert!(wait_until(|| client.state() == SyncState::Syncing).await);
	assert!(!client.is_enabled("new-ui", &ctx));
	assert!(client.get_value("new-ui").is_none());
	assert!(client.is_enabled("keep", &ctx));
	client.stop().await;
}

#[tokio::test]
async fn compacted_watch_resyncs_without_waiting() {
	init_tracing();
	let (_kv, etcd) = etcd_store().await;
	etcd.put("new-ui", &FlagValue::Boolean(true)).await.unwrap();

	let mut config = fast_config();
	config.sync.reconnect_base_delay = Duration::from_secs(30);
	config.sync.reconnect_max_delay = Duration::from_secs(30);

	let flaky = Arc::new(FlakyStore::new(etcd.clone()));
	let client = FlagsClient::builder()
		.config(config)
		.store(flaky.clone())
		.start()
		.await
		.unwrap();

	flaky.break_streams(StreamBreak::Compacted);
	assert!(wait_until(|| client.stats().resyncs == 1).await);
	assert_eq!(client.state(), SyncState::Syncing);

	etcd.put("new-ui", &FlagValue::Boolean(false)).await.unwrap();
	assert!(wait_until(|| !client.is_enabled("new-ui", &EvaluationContext::anonymous())).await);
	client.stop().await;
}

#[tokio::test]
async fn value_changed_during_outage_is_picked_up_on_recovery() {
	init_tracing();
	let (_kv, etcd) = etcd_store().await;
	etcd.put("new-ui", &FlagValue::Boolean(false)).await.unwrap();

	let flaky = Arc::new(FlakyStore::new(etcd.clone()));
	let client = FlagsClient::builder()
		.config(fast_config())
		.store(flaky.clone())
		.start()
		.await
		.unwrap();
	let ctx = EvaluationContext::new("user-42");
	assert!(!client.is_enabled("new-ui", &ctx));

	flaky.set_offline(true);
	flaky.break_streams(StreamBreak::Disconnect);
	assert!(wait_until(|| client.state() == SyncState::Degraded).await);

	let updated = etcd.put("new-ui", &FlagValue::Boolean(true)).await.unwrap();
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert!(!client.is_enabled("new-ui", &ctx));

	flaky.set_offline(false);
	assert!(wait_until(|| client.state() == SyncState::Syncing).await);
	assert!(client.is_enabled("new-ui", &ctx));
	assert_eq!(client.get_value("new-ui").unwrap().version(), updated);
	client.stop().await;
}
