//! Cycle coordinator.
//!
//! Drives one discover -> fan-out -> enrich -> emit -> save-stats cycle.
//! Concurrency is a counting semaphore; scheduling spreads each poll task's
//! start time uniformly across the configured cycle window so steady-state
//! network pressure stays roughly constant instead of bursting at the top
//! of every cycle.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::{cycle_seconds, Settings};
use crate::discover::discover;
use crate::enrich::enrich_node;
use crate::error::PollerError;
use crate::firmware::determine_protocol;
use crate::model::{CycleStats, MeshProtocol, NodeRecord};
use crate::persistence::{round_coordinates, Persistence};
use crate::poller::poll;
use crate::artifacts;

/// First-cycle concurrency burst, to amortise cold-start discovery. A
/// deliberate property, not a bug: subsequent cycles fall back to the
/// configured steady-state concurrency.
const FIRST_CYCLE_BUDGET: usize = 600;
const PROGRESS_LOG_INTERVAL: usize = 10;

pub struct Coordinator {
    client: reqwest::Client,
    persistence: Arc<Persistence>,
    settings: Settings,
    cycle_count: AtomicU64,
    shutdown: Arc<AtomicBool>,
    data_dir: PathBuf,
}

struct PollCandidate {
    ip: String,
    hops: u32,
}

impl Coordinator {
    pub fn new(
        client: reqwest::Client,
        persistence: Arc<Persistence>,
        settings: Settings,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let data_dir = PathBuf::from(settings.webpage_data_dir.clone());
        Self {
            client,
            persistence,
            settings,
            cycle_count: AtomicU64::new(0),
            shutdown,
            data_dir,
        }
    }

    /// Run exactly one cycle end to end.
    pub async fn run_cycle(&self) -> Result<(), PollerError> {
        let cycle_start = Instant::now();
        let cycle_no = self.cycle_count.fetch_add(1, Ordering::SeqCst) + 1;
        let concurrency_budget = if cycle_no == 1 {
            FIRST_CYCLE_BUDGET
        } else {
            self.settings.polling.num_parallel_threads as usize
        };

        info!(
            "cycle {cycle_no}: starting (concurrency budget {concurrency_budget})"
        );

        let bundle = discover(&self.client, &self.settings.polling.nodelist_node).await;
        let Some(bundle) = bundle else {
            warn!("cycle {cycle_no}: seed discovery failed, skipping cycle");
            return Ok(());
        };

        // Seed the discovered link map ahead of fan-out so a node's own
        // (possibly empty) link_info fetch can't wipe it — upsert_node's
        // COALESCE semantics only overwrite when the new value is non-null.
        for (seed_ip, links) in &bundle.links {
            if let Err(e) = self.persistence.update_link_info(seed_ip, links).await {
                warn!("cycle {cycle_no}: failed to seed link map for {seed_ip}: {e}");
            }
        }

        let candidates: Vec<PollCandidate> = bundle
            .nodes
            .iter()
            .filter_map(|n| {
                n.hops_away.map(|hops| PollCandidate {
                    ip: n.ip.clone(),
                    hops,
                })
            })
            .collect();

        let candidate_count = bundle.nodes.len() as u32;
        let n = candidates.len().max(1);
        let cycle_secs = cycle_seconds(self.settings.polling.poller_cycle_time_minutes);
        let delay_step = cycle_secs / n as f64;

        let semaphore = Arc::new(Semaphore::new(concurrency_budget));
        let mut tasks = JoinSet::new();

        for (i, candidate) in candidates.into_iter().enumerate() {
            let client = self.client.clone();
            let persistence = self.persistence.clone();
            let semaphore = semaphore.clone();
            let shutdown = self.shutdown.clone();
            let delay = Duration::from_secs_f64(delay_step * i as f64);

            tasks.spawn(async move {
                if shutdown.load(Ordering::SeqCst) {
                    return None;
                }
                tokio::time::sleep(delay).await;
                if shutdown.load(Ordering::SeqCst) {
                    return None;
                }
                let Ok(_permit) = semaphore.acquire().await else {
                    return None;
                };

                let result = poll(&client, &candidate.ip, Some(candidate.hops)).await;
                match result {
                    Some(mut record) => {
                        round_coordinates(&mut record);
                        if let Err(e) = persistence.upsert_node(&record).await {
                            warn!("cycle: upsert failed for {}: {e}", record.wlan_ip);
                            return Some(PollOutcome::Failed);
                        }
                        Some(PollOutcome::Succeeded {
                            has_location: record.has_location(),
                        })
                    }
                    None => {
                        // The node didn't answer at all this cycle (unlike a
                        // partial read that just lacked a link_info response,
                        // which upsert_node's COALESCE semantics already
                        // protect) — its previously reported links can no
                        // longer be trusted live, so clear them.
                        if let Err(e) = persistence.mark_inactive(&candidate.ip).await {
                            warn!("cycle: mark_inactive failed for {}: {e}", candidate.ip);
                        }
                        Some(PollOutcome::Failed)
                    }
                }
            });
        }

        let mut completed = 0usize;
        let mut count_failed = 0u32;
        let mut count_polled = 0u32;
        let mut count_no_location = 0u32;

        while let Some(joined) = tasks.join_next().await {
            completed += 1;
            match joined {
                Ok(Some(PollOutcome::Succeeded { has_location })) => {
                    count_polled += 1;
                    if !has_location {
                        count_no_location += 1;
                    }
                }
                Ok(Some(PollOutcome::Failed)) => count_failed += 1,
                Ok(None) => {} // short-circuited by shutdown
                Err(e) => warn!("cycle {cycle_no}: poll task panicked: {e}"),
            }
            if completed % PROGRESS_LOG_INTERVAL == 0 {
                info!("cycle {cycle_no}: {completed}/{n} polls complete");
            }
        }
        info!("cycle {cycle_no}: fan-out complete ({completed}/{n})");

        if self.shutdown.load(Ordering::SeqCst) {
            info!("cycle {cycle_no}: shutdown requested, skipping enrich/emit/save");
            return Ok(());
        }

        let mut nodes = self.persistence.get_all_nodes().await?;
        let coords: HashMap<String, (f64, f64)> = nodes
            .iter()
            .filter(|n| n.has_location())
            .map(|n| (n.wlan_ip.clone(), (n.lat, n.lon)))
            .collect();

        let mut mappable_links = 0u32;
        let mut mappable_nodes = 0u32;
        let mut max_hops = 0u32;
        for node in nodes.iter_mut() {
            if let Some(hops) = node.hops_away {
                max_hops = max_hops.max(hops);
            }
            if node.has_location() {
                mappable_nodes += 1;
            }
            let enriched = enrich_node(node, &coords);
            mappable_links += enriched;
            if enriched > 0 {
                if let Err(e) = self
                    .persistence
                    .update_link_info(&node.wlan_ip, &node.link_info)
                    .await
                {
                    warn!("cycle {cycle_no}: failed to write enriched links for {}: {e}", node.wlan_ip);
                }
            }
        }

        let (babel_count, olsr_count, combo_count) = count_protocols(&nodes, &self.settings);
        let (min_rt, max_rt) = response_time_bounds(&nodes);

        let stats = CycleStats {
            configured_concurrency: concurrency_budget as u32,
            candidate_count,
            count_failed,
            max_hops,
            count_polled,
            count_no_location,
            mappable_nodes,
            mappable_links,
            cycle_duration_secs: cycle_start.elapsed().as_secs_f64(),
            babel_count,
            olsr_count,
            combo_count,
            min_response_time_ms: min_rt,
            max_response_time_ms: max_rt,
        };

        // Artifacts are generated before the stats row is saved, so the
        // stats row itself is written last.
        artifacts::emit(&self.data_dir, &self.settings.map, &stats, &nodes).map_err(PollerError::from)?;
        self.persistence.save_stats(&stats).await?;

        info!(
            "cycle {cycle_no}: done in {:.1}s ({} polled, {} failed, {} mappable nodes, {} mappable links)",
            stats.cycle_duration_secs, count_polled, count_failed, mappable_nodes, mappable_links
        );

        Ok(())
    }
}

enum PollOutcome {
    Succeeded { has_location: bool },
    Failed,
}

fn response_time_bounds(nodes: &[NodeRecord]) -> (f64, f64) {
    let times: Vec<f64> = nodes
        .iter()
        .map(|n| n.response_time_ms)
        .filter(|t| *t > 0.0)
        .collect();
    if times.is_empty() {
        return (0.0, 0.0);
    }
    let min = times.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = times.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    (min, max)
}

fn count_protocols(nodes: &[NodeRecord], settings: &Settings) -> (u32, u32, u32) {
    let mut babel = 0;
    let mut olsr = 0;
    let mut combo = 0;
    for node in nodes {
        let protocol = determine_protocol(
            &node.firmware_version,
            node.last_seen,
            settings.classifier.protocol_threshold_seconds,
            &settings.classifier.protocol_version_cutoff,
            &settings.classifier.protocol_nightly_cutoff,
        );
        match protocol {
            MeshProtocol::Babel => babel += 1,
            MeshProtocol::Olsr => olsr += 1,
            MeshProtocol::Combo => combo += 1,
            MeshProtocol::Unknown => {}
        }
    }
    (babel, olsr, combo)
}
