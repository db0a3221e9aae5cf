//! # Load Generator
//!
//! Drives a running node through its public HTTP API with random purchases
//! and occasional cancellations, the way a fleet of point-of-sale clients
//! would.
//!
//! - Each purchase carries 1 to 10 line items of 1 or 2 units each;
//!   `cashAmount` equals `totalAmount`.
//! - 20% of purchases identify the user by phone, the rest by account.
//! - 30% of purchases are remembered as cancellation candidates. When there
//!   are candidates, a submission is a cancellation with probability 0.3,
//!   oldest candidate first.
//! - The sequence is read from `GET /v1/tx/sequence` once and then tracked
//!   locally; a `417` answer resynchronizes it from the error payload.

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::time::Duration;

use purchase_protocol::crypto::hash::{blake3_hash, Hash};
use purchase_protocol::crypto::keys::Keypair;

use crate::api::{ResponseData, CODE_OK, CODE_SEQUENCE};
use crate::cli::LoadgenArgs;

const CURRENCY: &str = "krw";
const PURCHASE_ID_PREFIX: &str = "91313";
const CANCEL_PROBABILITY: f64 = 0.3;
const REMEMBER_PROBABILITY: f64 = 0.3;
const PHONE_PROBABILITY: f64 = 0.2;

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Product {
    pub product_id: String,
    /// Unit price in whole currency units.
    pub amount: u64,
    /// Percent, up to two decimals.
    pub provide_percent: f64,
}

#[derive(Debug, Clone)]
pub struct User {
    pub address: String,
    pub phone: String,
}

/// Products, shops and users the generator draws from.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub products: Vec<Product>,
    pub shops: Vec<Hash>,
    pub users: Vec<User>,
}

impl Catalog {
    pub fn generate(rng: &mut impl Rng, products: usize, shops: usize, users: usize) -> Self {
        let products = (0..products)
            .map(|i| Product {
                product_id: format!("2020{:012}", i + 1),
                amount: rng.gen_range(10..=500) * 100,
                provide_percent: f64::from(rng.gen_range(0..=1000_u32)) / 100.0,
            })
            .collect();
        let shops = (0..shops)
            .map(|i| Hash::new(blake3_hash(format!("shop-{i}").as_bytes())))
            .collect();
        let users = (0..users)
            .map(|_| User {
                address: Keypair::generate().address().to_string(),
                phone: format!("082010{:08}", rng.gen_range(0..100_000_000_u32)),
            })
            .collect();
        Self {
            products,
            shops,
            users,
        }
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::generate(&mut StdRng::from_entropy(), 50, 10, 100)
    }
}

// ---------------------------------------------------------------------------
// Node client
// ---------------------------------------------------------------------------

/// Thin reqwest wrapper over the node's `/v1` endpoints.
pub struct NodeClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl NodeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        }
    }

    pub async fn get(&self, path: &str) -> Result<ResponseData> {
        let url = format!("{}{}", self.base_url, path);
        self.http_client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("decoding response of GET {url}"))
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<ResponseData> {
        let url = format!("{}{}", self.base_url, path);
        self.http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("decoding response of POST {url}"))
    }

    /// Next sequence the node will accept.
    pub async fn next_sequence(&self) -> Result<u64> {
        let resp = self.get("/v1/tx/sequence").await?;
        if resp.code != CODE_OK {
            bail!("sequence query failed with code {}: {:?}", resp.code, resp.error);
        }
        let last = resp
            .data
            .as_ref()
            .and_then(|d| d["sequence"].as_i64())
            .context("sequence missing from response")?;
        Ok((last + 1).max(0) as u64)
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// One submission chosen by the generator.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Purchase(Value),
    Cancel(Value),
}

impl Submission {
    fn path(&self) -> &'static str {
        match self {
            Submission::Purchase(_) => "/v1/tx/purchase/new",
            Submission::Cancel(_) => "/v1/tx/purchase/cancel",
        }
    }

    fn body(&self) -> &Value {
        match self {
            Submission::Purchase(b) | Submission::Cancel(b) => b,
        }
    }

    fn body_mut(&mut self) -> &mut Value {
        match self {
            Submission::Purchase(b) | Submission::Cancel(b) => b,
        }
    }
}

pub struct LoadGenerator {
    catalog: Catalog,
    access_key: String,
    rng: StdRng,
    candidates: VecDeque<String>,
    last_purchase_millis: i64,
}

impl LoadGenerator {
    pub fn new(catalog: Catalog, access_key: impl Into<String>, rng: StdRng) -> Self {
        Self {
            catalog,
            access_key: access_key.into(),
            rng,
            candidates: VecDeque::new(),
            last_purchase_millis: 0,
        }
    }

    pub fn pending_cancellations(&self) -> usize {
        self.candidates.len()
    }

    /// Pick the next submission. The sequence is filled in on send.
    pub fn next_submission(&mut self) -> Submission {
        if !self.candidates.is_empty() && self.rng.gen_bool(CANCEL_PROBABILITY) {
            if let Some(purchase_id) = self.candidates.pop_front() {
                return Submission::Cancel(self.cancel_body(&purchase_id));
            }
        }
        Submission::Purchase(self.purchase_body())
    }

    fn purchase_id(&mut self) -> String {
        let millis = chrono::Utc::now()
            .timestamp_millis()
            .max(self.last_purchase_millis + 1);
        self.last_purchase_millis = millis;
        format!("{PURCHASE_ID_PREFIX}{millis}")
    }

    fn purchase_body(&mut self) -> Value {
        let purchase_id = self.purchase_id();

        let lines = self.rng.gen_range(1..=10);
        let mut total: u64 = 0;
        let mut details = Vec::with_capacity(lines);
        for _ in 0..lines {
            let product = &self.catalog.products[self.rng.gen_range(0..self.catalog.products.len())];
            let count: u64 = self.rng.gen_range(1..=2);
            let amount = product.amount * count;
            total += amount;
            details.push(json!({
                "productId": product.product_id,
                "amount": amount,
                "providePercent": product.provide_percent,
            }));
        }

        let user = &self.catalog.users[self.rng.gen_range(0..self.catalog.users.len())];
        let shop = self.catalog.shops[self.rng.gen_range(0..self.catalog.shops.len())];

        if self.rng.gen_bool(REMEMBER_PROBABILITY) {
            self.candidates.push_back(purchase_id.clone());
        }

        let (account, phone) = if self.rng.gen_bool(PHONE_PROBABILITY) {
            (String::new(), user.phone.clone())
        } else {
            (user.address.clone(), String::new())
        };

        json!({
            "accessKey": self.access_key,
            "purchaseId": purchase_id,
            "timestamp": chrono::Utc::now().timestamp().to_string(),
            "totalAmount": total,
            "cashAmount": total,
            "currency": CURRENCY,
            "shopId": shop,
            "userAccount": account,
            "userPhone": phone,
            "details": details,
        })
    }

    fn cancel_body(&self, purchase_id: &str) -> Value {
        json!({
            "accessKey": self.access_key,
            "purchaseId": purchase_id,
            "timestamp": chrono::Utc::now().timestamp().to_string(),
        })
    }

    fn pause(&mut self, min_ms: u64, max_ms: u64) -> Duration {
        let (lo, hi) = if min_ms <= max_ms {
            (min_ms, max_ms)
        } else {
            (max_ms, min_ms)
        };
        Duration::from_millis(self.rng.gen_range(lo..=hi))
    }
}

/// What happened to one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accepted,
    /// The node expected another sequence; the local counter was reset.
    Resynced { expected: u64 },
    Rejected { code: u16 },
}

/// Sends one submission under `*sequence` and updates the counter.
pub async fn submit(
    client: &NodeClient,
    mut submission: Submission,
    sequence: &mut u64,
) -> Result<Outcome> {
    submission.body_mut()["sequence"] = json!(sequence.to_string());
    let resp = client.post(submission.path(), submission.body()).await?;

    match resp.code {
        CODE_OK => {
            tracing::info!(
                sequence = *sequence,
                path = submission.path(),
                purchase_id = %submission.body()["purchaseId"],
                "submission accepted"
            );
            *sequence += 1;
            Ok(Outcome::Accepted)
        }
        CODE_SEQUENCE => {
            let expected = resp
                .error
                .as_ref()
                .and_then(|e| e["expected"].as_u64())
                .context("417 without expected sequence")?;
            tracing::warn!(sent = *sequence, expected, "sequence out of step, resyncing");
            *sequence = expected;
            Ok(Outcome::Resynced { expected })
        }
        code => {
            tracing::warn!(code, error = ?resp.error, path = submission.path(), "submission rejected");
            Ok(Outcome::Rejected { code })
        }
    }
}

/// Runs the generator until `count` submissions were accepted or Ctrl+C.
pub async fn run(args: LoadgenArgs) -> Result<()> {
    let client = NodeClient::new(&args.url);
    let mut generator = LoadGenerator::new(
        Catalog::default(),
        args.access_key.clone(),
        StdRng::from_entropy(),
    );
    let mut sequence = client.next_sequence().await?;
    tracing::info!(url = %args.url, sequence, "load generator started");

    let mut accepted = 0u64;
    loop {
        if args.count.is_some_and(|n| accepted >= n) {
            break;
        }

        let submission = generator.next_submission();
        match submit(&client, submission, &mut sequence).await {
            Ok(Outcome::Accepted) => accepted += 1,
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "submission failed"),
        }

        let pause = generator.pause(args.min_interval, args.max_interval);
        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!(
        accepted,
        pending_cancellations = generator.pending_cancellations(),
        "load generator stopped"
    );
    Ok(())
}
