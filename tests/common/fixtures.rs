//! Firestore REST bodies for the fake endpoint

use serde_json::{json, Value as Json};

pub const PROJECT: &str = "demo";
pub const TRANSACTION: &str = "dHg=";
pub const READ_TIME: &str = "2024-05-01T10:00:00.000000Z";

pub const REWARD: &str = "users/u1/rewards/r1";
pub const CLAIM: &str = "users/u1/claims/c1";

/// Full resource name of a document in the fake project
pub fn name(path: &str) -> String {
    format!("projects/{}/databases/(default)/documents/{}", PROJECT, path)
}

pub fn begin_ok() -> Json {
    json!({ "transaction": TRANSACTION })
}

fn document(path: &str, fields: Json) -> Json {
    json!({
        "name": name(path),
        "fields": fields,
        "createTime": "2024-05-01T09:00:00.000000Z",
        "updateTime": READ_TIME
    })
}

/// `batchGet` answer for an existing document
pub fn found(path: &str, fields: Json) -> Json {
    json!([{ "found": document(path, fields), "readTime": READ_TIME }])
}

/// `batchGet` answer for a missing document
pub fn missing(path: &str) -> Json {
    json!([{ "missing": name(path), "readTime": READ_TIME }])
}

/// `runQuery` answer; an empty result still carries a read time entry
pub fn query_results(docs: &[(&str, Json)]) -> Json {
    if docs.is_empty() {
        return json!([{ "readTime": READ_TIME }]);
    }
    Json::Array(
        docs.iter()
            .map(|(path, fields)| json!({ "document": document(path, fields.clone()), "readTime": READ_TIME }))
            .collect(),
    )
}

pub fn commit_ok(writes: usize) -> Json {
    json!({
        "writeResults": vec![json!({ "updateTime": READ_TIME }); writes],
        "commitTime": READ_TIME
    })
}

/// Rollback answers with an empty object
pub fn empty() -> Json {
    json!({})
}

/// google.rpc.Status error body
pub fn rpc_error(code: u16, status: &str, message: &str) -> Json {
    json!({ "error": { "code": code, "message": message, "status": status } })
}

/// Fields of a redeemed reward owned by `owner`
pub fn redeemed_reward(points: i64, owner: &str) -> Json {
    json!({
        "used": { "booleanValue": true },
        "points": { "integerValue": points.to_string() },
        "ownerUid": { "stringValue": owner },
        "redeemedAt": { "timestampValue": "2024-05-01T10:00:00Z" }
    })
}

/// Fields of a claim pointing at `reward`
pub fn claim_for(reward: &str) -> Json {
    json!({ "rewardRef": { "referenceValue": name(reward) } })
}
