use std::{
    fmt::Debug,
    time::{Duration, Instant},
};

use arborist_hasher::{field::reduce_be, Hash, Hasher, Sha256};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::{
    errors::{ArboristError, ProverError},
    mirror::LocalTreeMirror,
    types::{Batch, CommitmentRecord, SubmissionArgs},
};

const PROVE_PATH: &str = "/prove";
const BASE_RETRY_DELAY_SECS: u64 = 1;

/// Everything the batch circuit needs for one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicInputs {
    pub args_hash: Hash,
    pub old_root: Hash,
    pub new_root: Hash,
    pub path_indices: u32,
    /// Siblings from the chunk subtree up to the root.
    pub path_elements: Vec<Hash>,
    pub leaves: Vec<CommitmentRecord>,
}

impl PublicInputs {
    pub fn submission_args(&self) -> SubmissionArgs {
        SubmissionArgs {
            args_hash: self.args_hash,
            old_root: self.old_root,
            new_root: self.new_root,
            path_indices: self.path_indices,
            leaves: self.leaves.clone(),
        }
    }

    /// Circuit input document sent to the prover.
    pub fn to_json(&self) -> serde_json::Value {
        let hex32 = |bytes: &[u8]| format!("0x{}", hex::encode(bytes));
        serde_json::json!({
            "argsHash": hex32(&self.args_hash),
            "oldRoot": hex32(&self.old_root),
            "newRoot": hex32(&self.new_root),
            "pathIndices": self.path_indices,
            "pathElements": self.path_elements.iter().map(|e| hex32(e)).collect::<Vec<_>>(),
            "instances": self.leaves.iter().map(|l| hex32(l.origin.as_slice())).collect::<Vec<_>>(),
            "hashes": self.leaves.iter().map(|l| hex32(l.value.as_slice())).collect::<Vec<_>>(),
            "blocks": self.leaves.iter().map(|l| l.block).collect::<Vec<_>>(),
        })
    }
}

/// `sha256(old_root || new_root || u32 path_indices || (value || origin ||
/// u32 block)*)` reduced into the scalar field.
pub fn compute_args_hash(
    old_root: &Hash,
    new_root: &Hash,
    path_indices: u32,
    leaves: &[CommitmentRecord],
) -> Result<Hash, ArboristError> {
    let mut data = Vec::with_capacity(68 + leaves.len() * 56);
    data.extend_from_slice(old_root);
    data.extend_from_slice(new_root);
    data.extend_from_slice(&path_indices.to_be_bytes());
    for leaf in leaves {
        let block = u32::try_from(leaf.block).map_err(|_| {
            ProverError::InvalidInput(format!(
                "block {} of leaf {} does not fit in 32 bits",
                leaf.block, leaf.index
            ))
        })?;
        data.extend_from_slice(leaf.value.as_slice());
        data.extend_from_slice(leaf.origin.as_slice());
        data.extend_from_slice(&block.to_be_bytes());
    }
    let digest = Sha256::hash(&data)?;
    Ok(reduce_be(&digest))
}

/// Builds the circuit inputs for appending `batch` as one chunk to
/// `tree_before`, the tree the batch was staged on.
pub fn build_public_inputs(
    tree_before: &LocalTreeMirror,
    batch: &Batch,
    chunk_height: usize,
) -> Result<PublicInputs, ArboristError> {
    let start_index = tree_before.next_index();
    if batch.start_index != start_index || batch.old_root != tree_before.root() {
        return Err(ProverError::InvalidInput(format!(
            "{} batch at {} was not staged on the tree at {}",
            batch.queue, batch.start_index, start_index
        ))
        .into());
    }
    let path_elements = tree_before.subtree_path(chunk_height)?;
    let path_indices = u32::try_from(start_index >> chunk_height).map_err(|_| {
        ProverError::InvalidInput(format!(
            "path index of leaf {} does not fit in 32 bits",
            start_index
        ))
    })?;
    let args_hash = compute_args_hash(
        &batch.old_root,
        &batch.new_root,
        path_indices,
        &batch.records,
    )?;

    Ok(PublicInputs {
        args_hash,
        old_root: batch.old_root,
        new_root: batch.new_root,
        path_indices,
        path_elements,
        leaves: batch.records.clone(),
    })
}

/// Turns circuit inputs into a proof. The proving system itself is opaque.
#[async_trait]
pub trait BatchProver: Send + Sync + Debug {
    async fn prove(&self, inputs: &PublicInputs) -> Result<Vec<u8>, ProverError>;
}

#[derive(Debug, Deserialize)]
struct ProofResponse {
    proof: String,
}

#[derive(Debug, Deserialize)]
struct JobResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct JobStatusResponse {
    status: String,
    message: Option<String>,
    result: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorResponse {
    code: String,
    message: String,
}

/// Client of a prover server. `POST /prove` either answers with the proof
/// (200) or with a job id (202) that is polled at `/prove/status`.
#[derive(Debug)]
pub struct HttpProver {
    client: Client,
    server_address: String,
    polling_interval: Duration,
    max_wait_time: Duration,
    max_retries: u32,
    api_key: Option<String>,
}

impl HttpProver {
    pub fn new(
        server_address: String,
        polling_interval: Duration,
        max_wait_time: Duration,
        max_retries: u32,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            server_address: server_address.trim_end_matches('/').to_string(),
            polling_interval,
            max_wait_time,
            max_retries,
            api_key,
        }
    }

    async fn try_generate_proof(
        &self,
        body: &str,
        elapsed: Duration,
    ) -> Result<Vec<u8>, ProverError> {
        let url = format!("{}{}", self.server_address, PROVE_PATH);
        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(api_key) = &self.api_key {
            request = request.header("X-API-Key", api_key);
        }

        let response = request.body(body.to_string()).send().await.map_err(|e| {
            ProverError::ProverServerError(format!("Failed to send request to prover server: {}", e))
        })?;
        let status_code = response.status();
        let response_text = response.text().await.map_err(|e| {
            ProverError::ProverServerError(format!("Failed to read response body: {}", e))
        })?;
        debug!("Prover response status: {}", status_code);

        match status_code {
            reqwest::StatusCode::OK => parse_proof(&response_text),
            reqwest::StatusCode::ACCEPTED => {
                let job: JobResponse = serde_json::from_str(&response_text).map_err(|e| {
                    ProverError::ProverServerError(format!("Failed to parse async response: {}", e))
                })?;
                info!("Proof job queued with ID: {}", job.job_id);
                self.poll_for_result(&job.job_id, elapsed).await
            }
            _ => {
                error!("HTTP error: status={}, body={}", status_code, response_text);
                Err(match serde_json::from_str::<ErrorResponse>(&response_text) {
                    Ok(e) => ProverError::ProverServerError(format!(
                        "{} {} - {}",
                        status_code, e.code, e.message
                    )),
                    Err(_) => {
                        ProverError::ProverServerError(format!("{} {}", status_code, response_text))
                    }
                })
            }
        }
    }

    async fn poll_for_result(
        &self,
        job_id: &str,
        start_elapsed: Duration,
    ) -> Result<Vec<u8>, ProverError> {
        let poll_start_time = Instant::now();
        let status_url = format!("{}/prove/status?job_id={}", self.server_address, job_id);
        let mut poll_count = 0;

        loop {
            poll_count += 1;
            let total_elapsed = start_elapsed + poll_start_time.elapsed();
            if total_elapsed > self.max_wait_time {
                return Err(ProverError::ProverServerError(format!(
                    "Job {} timed out after {:?} ({} polls)",
                    job_id, total_elapsed, poll_count
                )));
            }

            let mut request = self.client.get(&status_url);
            if let Some(api_key) = &self.api_key {
                request = request.header("X-API-Key", api_key);
            }
            let response = request.send().await.map_err(|e| {
                ProverError::ProverServerError(format!("Failed to check job status: {}", e))
            })?;
            let status_code = response.status();
            let response_text = response.text().await.unwrap_or_default();
            if !status_code.is_success() {
                return Err(ProverError::ProverServerError(format!(
                    "{} while polling job {}: {}",
                    status_code, job_id, response_text
                )));
            }
            let status: JobStatusResponse = serde_json::from_str(&response_text).map_err(|e| {
                ProverError::ProverServerError(format!("Failed to parse status response: {}", e))
            })?;

            match status.status.as_str() {
                "completed" => {
                    info!("Job {} completed after {:?} and {} polls", job_id, total_elapsed, poll_count);
                    let result = status.result.ok_or_else(|| {
                        ProverError::ProverServerError(format!("Job {} completed without a result", job_id))
                    })?;
                    return parse_proof(&result.to_string());
                }
                "failed" => {
                    let message = status
                        .message
                        .unwrap_or_else(|| "No error message provided".to_string());
                    error!("Job {} failed: {}", job_id, message);
                    return Err(ProverError::ProverServerError(format!(
                        "Proof job {} failed: {}",
                        job_id, message
                    )));
                }
                "processing" | "queued" => {
                    debug!("Job {} still {} (poll #{})", job_id, status.status, poll_count);
                }
                other => {
                    warn!("Job {} has unknown status '{}', continuing to poll", job_id, other);
                }
            }
            sleep(self.polling_interval).await;
        }
    }

    fn should_retry(&self, error: &ProverError, retries: u32, elapsed: Duration) -> bool {
        let error_str = error.to_string();
        let is_retryable_error = error_str.contains("job_not_found")
            || error_str.contains("connection")
            || error_str.contains("timed out")
            || error_str.contains("503")
            || error_str.contains("502")
            || error_str.contains("500");
        retries < self.max_retries && is_retryable_error && elapsed < self.max_wait_time
    }
}

#[async_trait]
impl BatchProver for HttpProver {
    async fn prove(&self, inputs: &PublicInputs) -> Result<Vec<u8>, ProverError> {
        let body = inputs.to_json().to_string();
        let start_time = Instant::now();
        let mut retries = 0;

        loop {
            let elapsed = start_time.elapsed();
            match self.try_generate_proof(&body, elapsed).await {
                Ok(proof) => return Ok(proof),
                Err(err) if self.should_retry(&err, retries, elapsed) => {
                    retries += 1;
                    let retry_delay = Duration::from_secs(BASE_RETRY_DELAY_SECS * retries as u64);
                    warn!(
                        "Retrying proof generation ({}/{}) after {:?} due to: {}",
                        retries, self.max_retries, retry_delay, err
                    );
                    sleep(retry_delay).await;
                }
                Err(err) if retries > 0 => {
                    return Err(ProverError::MaxRetriesExceeded {
                        attempts: retries + 1,
                        error: err.to_string(),
                    })
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn parse_proof(json: &str) -> Result<Vec<u8>, ProverError> {
    let response: ProofResponse = serde_json::from_str(json).map_err(|e| {
        ProverError::ProverServerError(format!("Failed to deserialize proof JSON: {}", e))
    })?;
    hex::decode(response.proof.trim_start_matches("0x"))
        .map_err(|e| ProverError::ProverServerError(format!("Proof is not hex: {}", e)))
}
