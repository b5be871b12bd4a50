//! Bucket access decisions.
//!
//! Header-signed requests and presigned redemptions both end up here with the
//! same `(bucket, operation, caller)` triple, and get the same answer.

use crate::{
    auth::AuthContext,
    errors::{AppError, AppResult},
    models::bucket::{Acl, Bucket},
};

/// Everything a caller can ask to do with a bucket or its contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Download,
    Upload,
    DeleteFile,
    ListFiles,
    ReadBucketInfo,
    DeleteBucket,
    IssuePresignedUrl,
    DispatchTask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// Decide whether `caller` may perform `op` on `bucket`.
///
/// Downloads from a `public-read` bucket are open to everyone. Every other
/// combination requires the caller to own the bucket.
pub fn evaluate(bucket: &Bucket, op: Operation, caller: Option<&AuthContext>) -> Decision {
    if bucket.acl == Acl::PublicRead && op == Operation::Download {
        return Decision::Allow;
    }
    match caller {
        Some(ctx) if bucket.is_owned_by(ctx.user_id) => Decision::Allow,
        _ => Decision::Deny,
    }
}

/// [`evaluate`], turned into an error on denial.
///
/// Anonymous callers get `Authentication` (they might succeed by signing);
/// authenticated callers get `Authorization`.
pub fn authorize(bucket: &Bucket, op: Operation, caller: Option<&AuthContext>) -> AppResult<()> {
    match (evaluate(bucket, op, caller), caller) {
        (Decision::Allow, _) => Ok(()),
        (Decision::Deny, None) => Err(AppError::authentication("authentication required")),
        (Decision::Deny, Some(ctx)) => {
            tracing::warn!(
                bucket = %bucket.name,
                user_id = %ctx.user_id,
                operation = ?op,
                "access denied"
            );
            Err(AppError::authorization("forbidden"))
        }
    }
}
