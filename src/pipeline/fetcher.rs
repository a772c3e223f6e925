//! Pipeline orchestration.
//!
//! One fetch task per roster system runs through a bounded concurrent
//! stream. Each task pages the killboard feed, drops NPC kills, consults
//! the dedup store, reserves fresh ids before enrichment, and merges its
//! results into a shared batch that is emitted on the output channel after
//! the join. A single system's failure never blocks the other systems'
//! results.

use crate::cache::DedupStore;
use crate::pipeline::killmail::Killmail;
use crate::roster::System;
use crate::runtime::monitor::BackpressureMonitor;
use crate::sources::KillmailSource;
use anyhow::{bail, Result};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const SERVICE_FETCH: &str = "fetch_system_killmails";
const SERVICE_DELIVER: &str = "killmail";

pub struct KillmailPipeline {
    source: Arc<dyn KillmailSource>,
    store: Arc<dyn DedupStore>,
    monitor: Arc<BackpressureMonitor>,
    out: mpsc::UnboundedSender<Killmail>,
    fetch_window: Duration,
    dedup_enabled: bool,
    concurrency: usize,
}

impl KillmailPipeline {
    pub fn new(
        source: Arc<dyn KillmailSource>,
        store: Arc<dyn DedupStore>,
        monitor: Arc<BackpressureMonitor>,
        out: mpsc::UnboundedSender<Killmail>,
        fetch_window: Duration,
        dedup_enabled: bool,
        concurrency: usize,
    ) -> Self {
        Self {
            source,
            store,
            monitor,
            out,
            fetch_window,
            dedup_enabled,
            concurrency: concurrency.max(1),
        }
    }

    /// Fetches new killmails for every system in the roster snapshot and
    /// emits the enriched records on the output channel.
    ///
    /// Per-system failures are collected and joined into one combined error
    /// after the surviving results have been delivered.
    pub async fn fetch(&self, systems: &[System], cancel: &CancellationToken) -> Result<()> {
        let results: Mutex<HashMap<String, Killmail>> = Mutex::new(HashMap::new());
        let results_ref = &results;

        let failures: Vec<(System, anyhow::Error)> = stream::iter(systems.to_vec())
            .map(|sys| async move {
                let _guard = self.monitor.guard(SERVICE_FETCH);
                match self.fetch_system(&sys, cancel).await {
                    Ok(kms) => {
                        results_ref
                            .lock()
                            .expect("pipeline batch lock poisoned")
                            .extend(kms);
                        None
                    }
                    Err(err) => {
                        tracing::error!(
                            system = sys.solar_system_id,
                            error = %err,
                            "failed to fetch system killmails"
                        );
                        Some((sys, err))
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .flatten()
            .collect();

        let merged = results
            .into_inner()
            .expect("pipeline batch lock poisoned");
        tracing::info!(count = merged.len(), "finished fetching killmails in the chain");

        for km in merged.into_values() {
            // The delivery stage decrements after it has handled the record.
            self.monitor.increase(SERVICE_DELIVER);
            if self.out.send(km).is_err() {
                self.monitor.decrease(SERVICE_DELIVER);
                bail!("killmail output channel closed");
            }
        }

        if !failures.is_empty() {
            let detail = failures
                .iter()
                .map(|(sys, err)| format!("{sys}: {err:#}"))
                .collect::<Vec<_>>()
                .join("; ");
            bail!(
                "failed to fetch killmails for {} of {} systems: {detail}",
                failures.len(),
                systems.len()
            );
        }

        Ok(())
    }

    async fn fetch_system(
        &self,
        sys: &System,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, Killmail>> {
        let summaries = self.collect_pages(sys, cancel).await?;

        let mut fresh: HashMap<String, Killmail> = HashMap::new();
        for mut km in summaries {
            if km.zkill.npc {
                continue;
            }

            let id = km.dedup_key();

            if self.dedup_enabled {
                match self.store.exists(&id).await {
                    Ok(true) => {
                        tracing::debug!(id = %id, "key already exists in cache");
                        continue;
                    }
                    Ok(false) => {}
                    Err(err) => {
                        // Fail open: a down cache means re-delivery, not loss.
                        tracing::error!(id = %id, error = %err, "failed to check id in cache; assuming new");
                    }
                }

                // Reserve the id before enrichment so overlapping pages in
                // the same cycle cannot both enrich it.
                if let Err(err) = self.store.add(&id).await {
                    tracing::error!(id = %id, error = %err, "failed to add id to cache");
                }
            }

            km.zkill.url = self.source.kill_url(km.killmail_id);

            let detail = self
                .source
                .killmail_detail(km.killmail_id, &km.zkill.hash, cancel)
                .await?;

            km.attackers = detail
                .attackers
                .into_iter()
                .filter(|attacker| !attacker.is_unattributed())
                .collect();
            km.victim = detail.victim;
            km.killmail_time = detail.killmail_time;

            tracing::info!(
                id = km.killmail_id,
                hash = %km.zkill.hash,
                deviation_minutes = km.deviation_minutes().unwrap_or_default(),
                "retrieved new killmail"
            );

            fresh.insert(id, km);
        }

        tracing::debug!(
            system = sys.solar_system_id,
            count = fresh.len(),
            "finished fetching killmails in system"
        );
        Ok(fresh)
    }

    async fn collect_pages(
        &self,
        sys: &System,
        cancel: &CancellationToken,
    ) -> Result<Vec<Killmail>> {
        let past_seconds = self.fetch_window.as_secs();
        let mut summaries: Vec<Killmail> = Vec::new();
        let mut page = 1u32;

        loop {
            if cancel.is_cancelled() {
                bail!("fetch cancelled");
            }

            match self
                .source
                .system_page(sys.solar_system_id, past_seconds, page, cancel)
                .await
            {
                Ok(batch) if batch.is_empty() => break,
                Ok(batch) => {
                    summaries.extend(batch);
                    page += 1;
                }
                Err(err) => {
                    // Pagination stops here but earlier pages are kept; the
                    // next tick will pick up whatever this one missed.
                    tracing::error!(
                        system = sys.solar_system_id,
                        page,
                        error = %err,
                        "failed to fetch killmail page"
                    );
                    break;
                }
            }
        }

        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::pipeline::killmail::{CharacterInfo, ZkillMeta};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn summary(id: u64, npc: bool) -> Killmail {
        Killmail {
            killmail_id: id,
            zkill: ZkillMeta {
                url: String::new(),
                hash: format!("hash-{id}"),
                npc,
            },
            ..Killmail::default()
        }
    }

    struct FakeSource {
        pages: HashMap<u64, Vec<Vec<Killmail>>>,
        page_requests: AtomicUsize,
        detail_requests: AtomicUsize,
        fail_detail_for: Vec<u64>,
    }

    impl FakeSource {
        fn new(pages: HashMap<u64, Vec<Vec<Killmail>>>) -> Self {
            Self {
                pages,
                page_requests: AtomicUsize::new(0),
                detail_requests: AtomicUsize::new(0),
                fail_detail_for: Vec::new(),
            }
        }

        fn single_system(system_id: u64, pages: Vec<Vec<Killmail>>) -> Self {
            Self::new(HashMap::from([(system_id, pages)]))
        }
    }

    #[async_trait]
    impl KillmailSource for FakeSource {
        async fn system_page(
            &self,
            system_id: u64,
            _past_seconds: u64,
            page: u32,
            _cancel: &CancellationToken,
        ) -> Result<Vec<Killmail>> {
            self.page_requests.fetch_add(1, Ordering::SeqCst);
            let batch = self
                .pages
                .get(&system_id)
                .and_then(|pages| pages.get(page as usize - 1))
                .cloned()
                .unwrap_or_default();
            Ok(batch)
        }

        async fn killmail_detail(
            &self,
            id: u64,
            _hash: &str,
            _cancel: &CancellationToken,
        ) -> Result<Killmail> {
            self.detail_requests.fetch_add(1, Ordering::SeqCst);
            if self.fail_detail_for.contains(&id) {
                return Err(anyhow!("enrichment unavailable for {id}"));
            }
            Ok(Killmail {
                killmail_id: id,
                killmail_time: Some(Utc::now()),
                attackers: vec![
                    CharacterInfo {
                        character_id: 100 + id,
                        corporation_id: 200 + id,
                        alliance_id: 0,
                    },
                    CharacterInfo::default(),
                ],
                victim: CharacterInfo {
                    character_id: 9,
                    corporation_id: 10,
                    alliance_id: 0,
                },
                ..Killmail::default()
            })
        }

        fn kill_url(&self, id: u64) -> String {
            format!("https://killboard.test/kill/{id}/")
        }
    }

    struct FailingStore;

    #[async_trait]
    impl DedupStore for FailingStore {
        async fn add(&self, _id: &str) -> Result<()> {
            Err(anyhow!("store down"))
        }

        async fn exists(&self, _id: &str) -> Result<bool> {
            Err(anyhow!("store down"))
        }
    }

    struct Harness {
        pipeline: KillmailPipeline,
        source: Arc<FakeSource>,
        rx: mpsc::UnboundedReceiver<Killmail>,
    }

    fn harness_with(source: FakeSource, store: Arc<dyn DedupStore>, dedup: bool) -> Harness {
        let source = Arc::new(source);
        let (tx, rx) = mpsc::unbounded_channel();
        let pipeline = KillmailPipeline::new(
            source.clone(),
            store,
            Arc::new(BackpressureMonitor::new()),
            tx,
            Duration::from_secs(3600),
            dedup,
            4,
        );
        Harness {
            pipeline,
            source,
            rx,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Killmail>) -> Vec<Killmail> {
        let mut records = Vec::new();
        while let Ok(km) = rx.try_recv() {
            records.push(km);
        }
        records
    }

    #[tokio::test]
    async fn two_pages_five_events_yield_five_records() {
        let pages = vec![
            (1..=5).map(|id| summary(id, false)).collect::<Vec<_>>(),
            Vec::new(),
        ];
        let mut h = harness_with(
            FakeSource::single_system(31000001, pages),
            Arc::new(MemoryStore::default()),
            true,
        );

        let roster = vec![System::new("J100001", 31000001)];
        h.pipeline
            .fetch(&roster, &CancellationToken::new())
            .await
            .expect("fetch should succeed");

        assert_eq!(h.source.page_requests.load(Ordering::SeqCst), 2);
        assert_eq!(h.source.detail_requests.load(Ordering::SeqCst), 5);
        assert_eq!(drain(&mut h.rx).len(), 5);
    }

    #[tokio::test]
    async fn npc_kills_are_dropped_at_the_source() {
        let pages = vec![vec![summary(1, true), summary(2, false)], Vec::new()];
        let mut h = harness_with(
            FakeSource::single_system(31000001, pages),
            Arc::new(MemoryStore::default()),
            true,
        );

        let roster = vec![System::new("J100001", 31000001)];
        h.pipeline
            .fetch(&roster, &CancellationToken::new())
            .await
            .unwrap();

        let records = drain(&mut h.rx);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].killmail_id, 2);
        assert_eq!(h.source.detail_requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn enrichment_drops_unattributed_attackers_and_sets_provenance() {
        let pages = vec![vec![summary(7, false)], Vec::new()];
        let mut h = harness_with(
            FakeSource::single_system(31000001, pages),
            Arc::new(MemoryStore::default()),
            true,
        );

        let roster = vec![System::new("J100001", 31000001)];
        h.pipeline
            .fetch(&roster, &CancellationToken::new())
            .await
            .unwrap();

        let records = drain(&mut h.rx);
        assert_eq!(records.len(), 1);
        let km = &records[0];
        assert_eq!(km.attackers.len(), 1, "the zero-affiliation attacker is noise");
        assert_eq!(km.zkill.url, "https://killboard.test/kill/7/");
        assert!(km.killmail_time.is_some());
    }

    #[tokio::test]
    async fn cached_ids_are_skipped_without_enrichment() {
        let pages = vec![vec![summary(1, false), summary(2, false)], Vec::new()];
        let store = Arc::new(MemoryStore::default());
        store.add("1").await.unwrap();

        let mut h = harness_with(
            FakeSource::single_system(31000001, pages),
            store,
            true,
        );

        let roster = vec![System::new("J100001", 31000001)];
        h.pipeline
            .fetch(&roster, &CancellationToken::new())
            .await
            .unwrap();

        let records = drain(&mut h.rx);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].killmail_id, 2);
        assert_eq!(h.source.detail_requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_cycle_emits_nothing_new() {
        let pages = vec![vec![summary(1, false)], Vec::new()];
        let store: Arc<dyn DedupStore> = Arc::new(MemoryStore::default());
        let source = Arc::new(FakeSource::single_system(31000001, pages));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pipeline = KillmailPipeline::new(
            source,
            store,
            Arc::new(BackpressureMonitor::new()),
            tx,
            Duration::from_secs(3600),
            true,
            4,
        );

        let roster = vec![System::new("J100001", 31000001)];
        let cancel = CancellationToken::new();
        pipeline.fetch(&roster, &cancel).await.unwrap();
        assert_eq!(drain(&mut rx).len(), 1);

        pipeline.fetch(&roster, &cancel).await.unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn store_failure_fails_open() {
        let pages = vec![vec![summary(1, false)], Vec::new()];
        let mut h = harness_with(
            FakeSource::single_system(31000001, pages),
            Arc::new(FailingStore),
            true,
        );

        let roster = vec![System::new("J100001", 31000001)];
        h.pipeline
            .fetch(&roster, &CancellationToken::new())
            .await
            .expect("store failures must not block delivery");

        assert_eq!(drain(&mut h.rx).len(), 1);
    }

    #[tokio::test]
    async fn one_failing_system_does_not_block_the_others() {
        let mut source = FakeSource::new(HashMap::from([
            (1, vec![vec![summary(10, false)], Vec::new()]),
            (2, vec![vec![summary(20, false)], Vec::new()]),
        ]));
        source.fail_detail_for = vec![20];

        let mut h = harness_with(source, Arc::new(MemoryStore::default()), true);

        let roster = vec![System::new("A", 1), System::new("B", 2)];
        let err = h
            .pipeline
            .fetch(&roster, &CancellationToken::new())
            .await
            .expect_err("the failing system must surface");
        assert!(err.to_string().contains("1 of 2 systems"));

        let records = drain(&mut h.rx);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].killmail_id, 10);
    }

    #[tokio::test]
    async fn page_error_keeps_earlier_pages() {
        // Page 2 is absent from the script, so the fake returns an empty
        // batch; simulate a mid-pagination error with a dedicated source.
        struct FlakyPages {
            inner: FakeSource,
        }

        #[async_trait]
        impl KillmailSource for FlakyPages {
            async fn system_page(
                &self,
                system_id: u64,
                past_seconds: u64,
                page: u32,
                cancel: &CancellationToken,
            ) -> Result<Vec<Killmail>> {
                if page == 2 {
                    return Err(anyhow!("page feed hiccup"));
                }
                self.inner
                    .system_page(system_id, past_seconds, page, cancel)
                    .await
            }

            async fn killmail_detail(
                &self,
                id: u64,
                hash: &str,
                cancel: &CancellationToken,
            ) -> Result<Killmail> {
                self.inner.killmail_detail(id, hash, cancel).await
            }

            fn kill_url(&self, id: u64) -> String {
                self.inner.kill_url(id)
            }
        }

        let inner = FakeSource::single_system(
            1,
            vec![vec![summary(1, false)], vec![summary(2, false)], Vec::new()],
        );
        let source = Arc::new(FlakyPages { inner });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pipeline = KillmailPipeline::new(
            source,
            Arc::new(MemoryStore::default()),
            Arc::new(BackpressureMonitor::new()),
            tx,
            Duration::from_secs(3600),
            true,
            4,
        );

        pipeline
            .fetch(&[System::new("A", 1)], &CancellationToken::new())
            .await
            .expect("page errors are non-fatal");

        let records = drain(&mut rx);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].killmail_id, 1);
    }

    #[tokio::test]
    async fn cancellation_aborts_the_fetch() {
        let pages = vec![vec![summary(1, false)], Vec::new()];
        let mut h = harness_with(
            FakeSource::single_system(31000001, pages),
            Arc::new(MemoryStore::default()),
            true,
        );

        let cancel = CancellationToken::new();
        cancel.cancel();

        let roster = vec![System::new("J100001", 31000001)];
        let err = h.pipeline.fetch(&roster, &cancel).await.expect_err("cancelled");
        assert!(err.to_string().contains("cancelled"));
        assert!(drain(&mut h.rx).is_empty());
    }
}
