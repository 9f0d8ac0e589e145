use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use pipebench_http::HttpClient;
use pipebench_metrics::{ScoreTag, TagPair};
use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng as _};
use tokio::time::Instant;

use super::client::{ApiError, PipeClient};
use super::scenarios::{Account, PipeScenario, ViewerSession, random_label, unix_now};
use super::types::{InitializeResponse, LivecommentRequest, ReservationRequest};
use crate::config::{BenchConfig, WorkloadMix};
use crate::error::Result;
use crate::failure::BenchError;
use crate::resolver::ResolveError;
use crate::scenario::{Registration, ScenarioContext, Workload};
use crate::session::Suite;

const PRETEST_TIP: i64 = 500;
const ICON_SIZE: usize = 512;

/// Pretest, workload and finalcheck for the live-streaming target.
#[derive(Debug, Clone)]
pub struct PipeSuite {
    http: HttpClient,
    base_url: String,
    base_domain: String,
    request_timeout: Duration,
    mix: WorkloadMix,
    finalcheck_sample: usize,
}

impl PipeSuite {
    pub fn new(config: &BenchConfig) -> Self {
        Self {
            http: HttpClient::default(),
            base_url: config.target_base_url.clone(),
            base_domain: config.base_domain.trim_matches('.').to_string(),
            request_timeout: config.request_timeout,
            mix: config.mix,
            finalcheck_sample: config.finalcheck_sample.max(1),
        }
    }

    pub fn client(&self) -> PipeClient {
        PipeClient::new(self.http.clone(), &self.base_url, self.request_timeout)
    }

    /// Resets the target. Runs before pretest, outside every phase.
    pub async fn initialize(
        &self,
        timeout: Duration,
    ) -> std::result::Result<InitializeResponse, BenchError> {
        let res = self
            .client()
            .with_request_timeout(timeout)
            .initialize(Instant::now() + timeout)
            .await?;
        tracing::info!(language = %res.language, "target initialized");
        Ok(res)
    }

    fn subdomain(&self, label: &str) -> String {
        format!("{label}.{}", self.base_domain)
    }
}

impl Suite for PipeSuite {
    type Scenario = PipeScenario;

    async fn pretest(&self, ctx: &ScenarioContext) -> std::result::Result<(), BenchError> {
        let mut rng = StdRng::from_entropy();
        let mut client = self.client();
        let deadline = ctx.deadline();

        let account = Account::random(&mut rng, "pre");
        let user = client
            .register(&account.register_request(), deadline)
            .await
            .map_err(|e| context("pretest: registration failed", e))?;
        if user.name != account.name {
            return Err(BenchError::critical(
                "pretest: registration returned a different user name",
            ));
        }
        client
            .login(&account.name, &account.password, deadline)
            .await
            .map_err(|e| context("pretest: login failed", e))?;

        let icon = random_icon(&mut rng);
        client
            .post_icon(icon.clone(), deadline)
            .await
            .map_err(|e| context("pretest: icon upload failed", e))?;
        let fetched = client
            .user_icon(&account.name, deadline)
            .await
            .map_err(|e| context("pretest: icon download failed", e))?;
        if fetched != icon {
            return Err(BenchError::critical(
                "pretest: icon read-back does not match the upload",
            ));
        }

        let title = format!("pretest {}", random_label(&mut rng, 6));
        let start_at = unix_now() + 3_600;
        let livestream = client
            .reserve_livestream(
                &ReservationRequest {
                    title: title.clone(),
                    description: "pretest reservation".to_string(),
                    start_at,
                    end_at: start_at + 3_600,
                },
                deadline,
            )
            .await
            .map_err(|e| context("pretest: reservation failed", e))?;
        if livestream.title != title || livestream.owner.name != account.name {
            return Err(BenchError::critical(
                "pretest: reservation response does not match the request",
            ));
        }

        let reply = client
            .post_livecomment(
                livestream.id,
                &LivecommentRequest {
                    comment: "pretest".to_string(),
                    tip: PRETEST_TIP,
                },
                deadline,
            )
            .await
            .map_err(|e| context("pretest: live comment failed", e))?;
        if reply.tip != PRETEST_TIP {
            return Err(BenchError::critical(
                "pretest: live comment acknowledged a different tip",
            ));
        }
        let stats = client
            .livestream_statistics(livestream.id, deadline)
            .await
            .map_err(|e| context("pretest: statistics failed", e))?;
        if stats.total_tips != PRETEST_TIP {
            return Err(BenchError::critical("pretest: statistics do not reflect the tip")
                .with_cause(format!("expected {PRETEST_TIP}, got {}", stats.total_tips)));
        }

        let host = self.subdomain(&account.name);
        if let Err(err) = ctx.resolve(&host).await {
            return Err(BenchError::critical(
                "pretest: subdomain of a registered user does not resolve",
            )
            .with_cause(err));
        }

        let unknown = self.subdomain(&format!("nx{}", random_label(&mut rng, 12)));
        match ctx
            .resolver()
            .resolve_with_attempts(&unknown, 1, ctx.counters(), deadline)
            .await
        {
            Ok(addr) => {
                return Err(BenchError::critical("pretest: an unregistered subdomain resolves")
                    .with_cause(format!("{unknown} -> {addr}")));
            }
            Err(ResolveError::Deadline { .. }) => {
                return Err(BenchError::timeout("pretest: ran out of time resolving subdomains"));
            }
            Err(ResolveError::Exhausted { .. }) => {}
        }

        tracing::debug!(user = %account.name, livestream = livestream.id, "pretest checks passed");
        Ok(())
    }

    fn workload(&self) -> Result<Workload<PipeScenario>> {
        let mix = self.mix;
        Workload::new(vec![
            Registration::new(
                PipeScenario::RegisterViewer,
                TagPair::new(ScoreTag::RegisterViewer, ScoreTag::RegisterViewerFail),
                mix.register_viewer,
            ),
            Registration::new(
                PipeScenario::ReserveLivestream,
                TagPair::new(ScoreTag::ReserveLivestream, ScoreTag::ReserveLivestreamFail),
                mix.reserve_livestream,
            ),
            Registration::new(
                PipeScenario::BrowseLivestreams,
                TagPair::new(ScoreTag::BrowseLivestreams, ScoreTag::BrowseLivestreamsFail),
                mix.browse_livestreams,
            ),
            Registration::new(
                PipeScenario::PostTip,
                TagPair::new(ScoreTag::PostTip, ScoreTag::PostTipFail),
                mix.post_tip,
            ),
        ])
    }

    fn new_session(&self, worker: u64) -> ViewerSession {
        ViewerSession::new(self.client(), &self.base_domain, worker)
    }

    async fn finalcheck(
        &self,
        ctx: &ScenarioContext,
        sessions: &[ViewerSession],
    ) -> std::result::Result<(), BenchError> {
        let deadline = ctx.deadline();
        let mut client = self.client();

        let accounts: Vec<&Account> = sessions.iter().flat_map(|s| s.accounts()).collect();
        for account in sample(&accounts, self.finalcheck_sample) {
            client
                .login(&account.name, &account.password, deadline)
                .await
                .map_err(|e| {
                    context(
                        "finalcheck: an account created during the benchmark cannot log in",
                        e,
                    )
                })?;
            let host = self.subdomain(&account.name);
            if let Err(err) = ctx.resolve(&host).await {
                return Err(BenchError::critical(
                    "finalcheck: subdomain of a user registered during the benchmark does not resolve",
                )
                .with_cause(err));
            }
        }

        let mut sent: BTreeMap<i64, i64> = BTreeMap::new();
        for tip in sessions.iter().flat_map(|s| s.tips()) {
            *sent.entry(tip.livestream).or_default() += tip.amount;
        }
        if sent.is_empty() {
            return Ok(());
        }
        if !client.is_logged_in() {
            let checker = Account::random(&mut StdRng::from_entropy(), "chk");
            client
                .register(&checker.register_request(), deadline)
                .await
                .map_err(|e| context("finalcheck: registration failed", e))?;
            client
                .login(&checker.name, &checker.password, deadline)
                .await
                .map_err(|e| context("finalcheck: login failed", e))?;
        }

        let livestreams: Vec<(i64, i64)> = sent.into_iter().collect();
        for &(livestream, amount) in sample(&livestreams, self.finalcheck_sample) {
            let stats = client
                .livestream_statistics(livestream, deadline)
                .await
                .map_err(|e| context("finalcheck: statistics failed", e))?;
            if stats.total_tips < amount {
                return Err(BenchError::critical(
                    "finalcheck: tip total is lower than the tips the target acknowledged",
                )
                .with_cause(format!(
                    "livestream {livestream}: reported {}, acknowledged {amount}",
                    stats.total_tips
                )));
            }
        }
        Ok(())
    }
}

fn context(what: &str, err: ApiError) -> BenchError {
    let err = BenchError::from(err);
    BenchError::new(err.category(), what).with_cause(err)
}

/// Up to `n` items spread evenly over `items`.
fn sample<T>(items: &[T], n: usize) -> impl Iterator<Item = &T> {
    let step = items.len().div_ceil(n.max(1)).max(1);
    items.iter().step_by(step).take(n)
}

/// Bytes starting with a JPEG SOI marker; the target stores them opaquely.
fn random_icon(rng: &mut StdRng) -> Bytes {
    let mut icon = vec![0xFF, 0xD8, 0xFF, 0xE0];
    icon.extend((0..ICON_SIZE).map(|_| rng.r#gen::<u8>()));
    Bytes::from(icon)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_spreads_over_the_input() {
        let items: Vec<u32> = (0..10).collect();
        let picked: Vec<u32> = sample(&items, 3).copied().collect();
        assert_eq!(picked, vec![0, 4, 8]);

        let all: Vec<u32> = sample(&items, 20).copied().collect();
        assert_eq!(all, items);
        assert_eq!(sample::<u32>(&[], 5).count(), 0);
    }

    #[test]
    fn context_keeps_category_and_wraps_cause() {
        let err = context(
            "pretest: login failed",
            ApiError::Failed(BenchError::timeout("POST /api/login")),
        );
        assert_eq!(err.category(), crate::ErrorCategory::Timeout);
        assert_eq!(err.message(), "pretest: login failed");
        assert_eq!(err.cause(), Some("[timeout] POST /api/login"));
    }

    #[test]
    fn workload_skips_disabled_scenarios() {
        let config = BenchConfig {
            mix: WorkloadMix {
                register_viewer: 1,
                reserve_livestream: 0,
                browse_livestreams: 0,
                post_tip: 0,
            },
            ..BenchConfig::default()
        };
        let workload = PipeSuite::new(&config)
            .workload()
            .unwrap_or_else(|e| panic!("{e}"));
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            assert_eq!(workload.pick(&mut rng).scenario, PipeScenario::RegisterViewer);
        }
    }
}
