use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use pipebench_metrics::ScoreTag;
use rand::rngs::StdRng;
use rand::seq::SliceRandom as _;
use rand::{Rng, SeedableRng as _};

use super::client::{ApiError, PipeClient};
use super::types::{LivecommentRequest, RegisterRequest, ReservationRequest};
use crate::failure::BenchError;
use crate::scenario::{Outcome, Scenario, ScenarioContext};

const LABEL_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const TIP_AMOUNTS: [i64; 5] = [100, 500, 1_000, 5_000, 10_000];
/// Livestream ids remembered from the last search.
const KNOWN_LIVESTREAMS: usize = 16;

/// Lowercase alphanumeric string, valid as a DNS label.
pub(crate) fn random_label<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| char::from(LABEL_CHARS[rng.gen_range(0..LABEL_CHARS.len())]))
        .collect()
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub password: String,
}

impl Account {
    pub(crate) fn random<R: Rng + ?Sized>(rng: &mut R, prefix: &str) -> Self {
        Self {
            name: format!("{prefix}{}", random_label(rng, 10)),
            password: random_label(rng, 16),
        }
    }

    pub(crate) fn register_request(&self) -> RegisterRequest {
        RegisterRequest {
            name: self.name.clone(),
            display_name: format!("viewer {}", self.name),
            description: "benchmark viewer".to_string(),
            password: self.password.clone(),
        }
    }
}

/// A tip the target acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentTip {
    pub livestream: i64,
    pub amount: i64,
}

/// Everything one virtual user remembers between iterations.
#[derive(Debug)]
pub struct ViewerSession {
    client: PipeClient,
    rng: StdRng,
    base_domain: Arc<str>,
    worker: u64,
    current: Option<Account>,
    accounts: Vec<Account>,
    reserved: Vec<i64>,
    known: Vec<i64>,
    tips: Vec<SentTip>,
}

impl ViewerSession {
    pub fn new(client: PipeClient, base_domain: &str, worker: u64) -> Self {
        Self {
            client,
            rng: StdRng::from_entropy(),
            base_domain: Arc::from(base_domain.trim_matches('.')),
            worker,
            current: None,
            accounts: Vec::new(),
            reserved: Vec::new(),
            known: Vec::new(),
            tips: Vec::new(),
        }
    }

    pub fn worker(&self) -> u64 {
        self.worker
    }

    /// Accounts this user registered, oldest first.
    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn reserved(&self) -> &[i64] {
        &self.reserved
    }

    pub fn tips(&self) -> &[SentTip] {
        &self.tips
    }

    fn subdomain(&self, name: &str) -> String {
        format!("{name}.{}", self.base_domain)
    }

    fn fresh_account(&mut self) -> Account {
        let prefix = format!("v{}x", self.worker);
        Account::random(&mut self.rng, &prefix)
    }
}

/// Built-in scenarios against the live-streaming target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr, strum::EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum PipeScenario {
    RegisterViewer,
    ReserveLivestream,
    BrowseLivestreams,
    PostTip,
}

impl Scenario for PipeScenario {
    type Session = ViewerSession;

    fn name(&self) -> &'static str {
        (*self).into()
    }

    async fn run(
        &self,
        ctx: &ScenarioContext,
        session: &mut ViewerSession,
    ) -> Result<Outcome, BenchError> {
        let result = match self {
            Self::RegisterViewer => register_viewer(ctx, session).await,
            Self::ReserveLivestream => reserve_livestream(ctx, session).await,
            Self::BrowseLivestreams => browse_livestreams(ctx, session).await,
            Self::PostTip => post_tip(ctx, session).await,
        };
        match result {
            Ok(()) => Ok(Outcome::Completed),
            Err(ApiError::RateLimited) => Ok(Outcome::RateLimited),
            Err(ApiError::Failed(err)) => Err(err),
        }
    }
}

/// A new viewer signs up, logs in and checks that its subdomain exists.
async fn register_viewer(ctx: &ScenarioContext, s: &mut ViewerSession) -> Result<(), ApiError> {
    let account = s.fresh_account();
    let user = s
        .client
        .register(&account.register_request(), ctx.deadline())
        .await?;
    if user.name != account.name {
        return Err(BenchError::critical("registration returned a different user name").into());
    }
    s.accounts.push(account.clone());

    s.client
        .login(&account.name, &account.password, ctx.deadline())
        .await?;
    s.current = Some(account);

    // Outcome is counted by the resolver; a miss is not a scenario failure.
    let host = s.subdomain(&user.name);
    if let Err(err) = ctx.resolve(&host).await {
        tracing::debug!(worker = s.worker, %host, error = %err, "subdomain did not resolve");
    }
    Ok(())
}

async fn ensure_logged_in(ctx: &ScenarioContext, s: &mut ViewerSession) -> Result<(), ApiError> {
    if s.current.is_some() && s.client.is_logged_in() {
        return Ok(());
    }
    register_viewer(ctx, s).await
}

async fn reserve_livestream(ctx: &ScenarioContext, s: &mut ViewerSession) -> Result<(), ApiError> {
    ensure_logged_in(ctx, s).await?;

    let title = format!("live {}", random_label(&mut s.rng, 8));
    let start_at = unix_now() + 3_600 * s.rng.gen_range(1..=24);
    let req = ReservationRequest {
        title: title.clone(),
        description: "reserved by the benchmark".to_string(),
        start_at,
        end_at: start_at + 3_600,
    };
    let livestream = s.client.reserve_livestream(&req, ctx.deadline()).await?;

    let owner = s.current.as_ref().map(|a| a.name.as_str());
    if livestream.title != title || Some(livestream.owner.name.as_str()) != owner {
        return Err(BenchError::critical("reservation response does not match the request")
            .with_cause(format!("livestream {}", livestream.id))
            .into());
    }
    s.reserved.push(livestream.id);
    ctx.count(ScoreTag::Reservation, 1);
    Ok(())
}

async fn browse_livestreams(ctx: &ScenarioContext, s: &mut ViewerSession) -> Result<(), ApiError> {
    let found = s.client.search_livestreams(ctx.deadline()).await?;
    s.known = found
        .iter()
        .take(KNOWN_LIVESTREAMS)
        .map(|l| l.id)
        .collect();
    Ok(())
}

async fn post_tip(ctx: &ScenarioContext, s: &mut ViewerSession) -> Result<(), ApiError> {
    ensure_logged_in(ctx, s).await?;

    let livestream = match pick_livestream(s) {
        Some(id) => id,
        None => {
            browse_livestreams(ctx, s).await?;
            match pick_livestream(s) {
                Some(id) => id,
                None => {
                    reserve_livestream(ctx, s).await?;
                    match s.reserved.last() {
                        Some(id) => *id,
                        None => return Ok(()),
                    }
                }
            }
        }
    };

    let amount = TIP_AMOUNTS.choose(&mut s.rng).copied().unwrap_or(TIP_AMOUNTS[0]);
    let req = LivecommentRequest {
        comment: format!("nice stream! #{}", random_label(&mut s.rng, 4)),
        tip: amount,
    };
    let reply = s
        .client
        .post_livecomment(livestream, &req, ctx.deadline())
        .await?;
    if reply.tip != amount {
        return Err(BenchError::critical("live comment acknowledged a different tip")
            .with_cause(format!("sent {amount}, got {}", reply.tip))
            .into());
    }

    s.tips.push(SentTip { livestream, amount });
    ctx.count(ScoreTag::Tip, amount.unsigned_abs());
    Ok(())
}

fn pick_livestream(s: &mut ViewerSession) -> Option<i64> {
    let pool = if !s.known.is_empty() && (s.reserved.is_empty() || s.rng.gen_bool(0.7)) {
        &s.known
    } else {
        &s.reserved
    };
    pool.choose(&mut s.rng).copied()
}
