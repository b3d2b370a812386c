/// Reward Reversal
///
/// Undoes a redeemed reward inside a single transaction:
/// 1. Read the reward (must exist, must be `used == true`)
/// 2. Resolve the owner (`ownerUid`, else the `users/{uid}/rewards/` path)
/// 3. Delete every claim under `users/{uid}/claims` pointing at the reward
/// 4. Set `used = false` and remove `redeemedAt`
/// 5. Increment `users/{uid}.totalPoints` by the reward's points
///
/// Either all of it commits or none of it does. Nothing is retried.

use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};
use crate::document::{Document, DocumentUpdate, Number, Value};
use crate::metrics;
use crate::path::{owner_from_reward_path, DocumentPath, CLAIMS_COLLECTION};
use crate::store::{DocumentStore, StoreError, Transaction};

pub const FIELD_USED: &str = "used";
pub const FIELD_OWNER_UID: &str = "ownerUid";
pub const FIELD_POINTS: &str = "points";
pub const FIELD_REDEEMED_AT: &str = "redeemedAt";
pub const FIELD_REWARD_REF: &str = "rewardRef";
pub const FIELD_TOTAL_POINTS: &str = "totalPoints";

#[derive(Debug, Error)]
pub enum RevertError {
    #[error("Reward not found: {0}")]
    NotFound(DocumentPath),

    #[error("Reward is already unused: {0}")]
    AlreadyUnused(DocumentPath),

    #[error("Cannot determine owner UID for reward {0}")]
    OwnerResolution(DocumentPath),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RevertError {
    /// Metric label for this failure
    pub fn outcome(&self) -> &'static str {
        match self {
            RevertError::NotFound(_) => "not_found",
            RevertError::AlreadyUnused(_) => "already_unused",
            RevertError::OwnerResolution(_) => "owner_unresolved",
            RevertError::Store(_) => "store_error",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RevertOptions {
    /// Stage everything, report it, then roll back instead of committing.
    pub dry_run: bool,
}

/// Where the owner uid came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerSource {
    /// The reward's `ownerUid` field
    Field,
    /// Parsed from a legacy `users/{uid}/rewards/...` path
    Path,
}

impl fmt::Display for OwnerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerSource::Field => write!(f, "ownerUid field"),
            OwnerSource::Path => write!(f, "reward path"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RevertSummary {
    pub reward_path: DocumentPath,
    pub owner_uid: String,
    pub owner_source: OwnerSource,
    pub user_path: DocumentPath,
    pub refund: Number,
    pub deleted_claims: Vec<DocumentPath>,
    /// False for a dry run
    pub committed: bool,
}

impl RevertSummary {
    pub fn claims_deleted(&self) -> usize {
        self.deleted_claims.len()
    }
}

impl fmt::Display for RevertSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reward {}, +{} points to {}, deleted {} claim(s)",
            self.reward_path,
            self.refund,
            self.user_path,
            self.claims_deleted()
        )
    }
}

/// Owner uid for a reward: the stored `ownerUid` when it is a non-empty
/// string, otherwise the uid in a `users/{uid}/rewards/...` path.
pub fn resolve_owner(reward: &Document) -> Option<(String, OwnerSource)> {
    match reward.get(FIELD_OWNER_UID) {
        Some(Value::String(uid)) if !uid.is_empty() => {
            return Some((uid.clone(), OwnerSource::Field));
        }
        None | Some(Value::Null) | Some(Value::String(_)) => {}
        Some(other) => {
            warn!(
                reward = %reward.path,
                owner_uid = ?other,
                "ownerUid is not a string, falling back to the reward path"
            );
        }
    }

    let raw = reward.path.to_string();
    owner_from_reward_path(&raw).map(|uid| (uid.to_string(), OwnerSource::Path))
}

/// Points to give back: `points` if numeric, else zero.
pub fn refund_amount(reward: &Document) -> Number {
    reward
        .get(FIELD_POINTS)
        .and_then(Value::as_number)
        .unwrap_or(Number::ZERO)
}

/// Read, validate and stage the whole reversal on `tx` without committing.
pub async fn stage_revert<T: Transaction>(
    tx: &mut T,
    reward_path: &DocumentPath,
) -> Result<RevertSummary, RevertError> {
    let reward = tx
        .get(reward_path)
        .await?
        .ok_or_else(|| RevertError::NotFound(reward_path.clone()))?;

    // Anything but a literal `true` counts as unused
    if reward.get(FIELD_USED).and_then(Value::as_bool) != Some(true) {
        return Err(RevertError::AlreadyUnused(reward_path.clone()));
    }

    let (owner_uid, owner_source) =
        resolve_owner(&reward).ok_or_else(|| RevertError::OwnerResolution(reward_path.clone()))?;
    let user_path = DocumentPath::user(&owner_uid).map_err(|e| {
        warn!(reward = %reward_path, owner_uid = %owner_uid, error = %e, "Owner uid is not a valid path segment");
        RevertError::OwnerResolution(reward_path.clone())
    })?;
    if owner_source == OwnerSource::Path {
        debug!(reward = %reward_path, owner_uid = %owner_uid, "Reward has no ownerUid, using owner from path");
    }

    let refund = refund_amount(&reward);

    // All reads happen before the first staged write
    let claims_collection = user_path
        .collection(CLAIMS_COLLECTION)
        .map_err(|_| RevertError::OwnerResolution(reward_path.clone()))?;
    let claims = tx
        .query_equal(
            &claims_collection,
            FIELD_REWARD_REF,
            &Value::Reference(reward_path.clone()),
        )
        .await?;

    let mut deleted_claims = Vec::with_capacity(claims.len());
    for claim in claims {
        debug!(claim = %claim.path, reward = %reward_path, "Deleting claim");
        tx.delete(&claim.path);
        deleted_claims.push(claim.path);
    }

    tx.update(
        reward_path,
        DocumentUpdate::new()
            .set(FIELD_USED, Value::Boolean(false))
            .delete_field(FIELD_REDEEMED_AT),
    );

    tx.update(
        &user_path,
        DocumentUpdate::new().increment(FIELD_TOTAL_POINTS, refund),
    );

    Ok(RevertSummary {
        reward_path: reward_path.clone(),
        owner_uid,
        owner_source,
        user_path,
        refund,
        deleted_claims,
        committed: false,
    })
}

/// Revert a redeemed reward, all or nothing.
pub async fn revert_reward<S: DocumentStore>(
    store: &S,
    reward_path: &DocumentPath,
    options: RevertOptions,
) -> Result<RevertSummary, RevertError> {
    let result = run(store, reward_path, options).await;
    match &result {
        Ok(summary) if summary.committed => {
            metrics::record_reversal("committed");
            metrics::record_committed_reversal(summary.claims_deleted(), summary.refund.as_f64());
        }
        Ok(_) => metrics::record_reversal("dry_run"),
        Err(e) => metrics::record_reversal(e.outcome()),
    }
    result
}

async fn run<S: DocumentStore>(
    store: &S,
    reward_path: &DocumentPath,
    options: RevertOptions,
) -> Result<RevertSummary, RevertError> {
    let mut tx = store.begin().await?;

    let mut summary = match stage_revert(&mut tx, reward_path).await {
        Ok(summary) => summary,
        Err(e) => {
            // Release the transaction; the original error is what matters
            if let Err(rollback_err) = tx.rollback().await {
                warn!(reward = %reward_path, error = %rollback_err, "Rollback after failure did not succeed");
            }
            return Err(e);
        }
    };

    info!(
        reward = %summary.reward_path,
        owner_uid = %summary.owner_uid,
        owner_source = %summary.owner_source,
        refund = %summary.refund,
        claims = summary.claims_deleted(),
        writes = tx.pending_writes(),
        dry_run = options.dry_run,
        "Queued revert"
    );

    if options.dry_run {
        tx.rollback().await?;
        info!(reward = %reward_path, "Dry run, transaction rolled back");
        return Ok(summary);
    }

    tx.commit().await?;
    summary.committed = true;
    info!(reward = %reward_path, "Reward reverted");
    Ok(summary)
}
