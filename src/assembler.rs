//! Packaging of a finished task into a persistable record

use tracing::debug;

use crate::api::{
    AttestationData, AttestationEntry, PlainJsonResponse, PrivateData, TaskResult, VerificationType,
    ZkVmRequestData,
};
use crate::error::{Error, Result};

/// Build the task output from its parts
///
/// The record is keyed by the first entry's task id. A task result that names
/// a different task is rejected rather than silently mixed in.
pub fn assemble(
    task_result: &TaskResult,
    attest_result: Vec<AttestationEntry>,
    plain_responses: Option<Vec<PlainJsonResponse>>,
) -> Result<ZkVmRequestData> {
    let task_id = attest_result
        .first()
        .map(|entry| entry.task_id.clone())
        .ok_or_else(|| Error::InvalidInput("attest result is empty".into()))?;

    if !task_result.task_id.is_empty() && task_result.task_id != task_id {
        return Err(Error::TaskMismatch {
            expected: task_id,
            actual: task_result.task_id.clone(),
        });
    }

    let plain_json_response =
        plain_responses.ok_or_else(|| Error::MissingPlainResponse(task_id.clone()))?;

    debug!(
        task_id = %task_id,
        entries = attest_result.len(),
        responses = plain_json_response.len(),
        "assembled attestation record"
    );

    Ok(ZkVmRequestData {
        attestation_data: AttestationData {
            verification_type: VerificationType::HashComparison,
            public_data: attest_result,
            private_data: PrivateData { plain_json_response },
        },
        requestid: task_id,
    })
}
