//! Error type of the vector index subsystem
//!
//! Every error maps losslessly to the wire `common.Errno`, so RPC handlers
//! can embed it in responses and clients can reconstruct it on the far side.

use proto::common::{Errno, Error as PbError};
use thiserror::Error;

pub type VectorResult<T> = Result<T, VectorError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VectorError {
    #[error("internal error: {0}")]
    Internal(String),
    #[error("illegal parameters: {0}")]
    IllegalParameters(String),
    #[error("raft node not found: {0}")]
    RaftNotFound(String),
    #[error("file reader not found: {0}")]
    FileNotFoundReader(String),
    #[error("read file failed: {0}")]
    FileRead(String),
    #[error("vector index snapshot not found: {0}")]
    SnapshotNotFound(String),
    #[error("vector index snapshot already exists: {0}")]
    SnapshotExist(String),
    #[error("vector index snapshot invalid: {0}")]
    SnapshotInvalid(String),
    #[error("not need snapshot, follower owns the vector index")]
    NotNeedSnapshot,
    #[error("vector index not support: {0}")]
    NotSupport(String),
    #[error("vector index snapshot is busy")]
    SnapshotBusy,
}

impl VectorError {
    pub fn internal(msg: impl Into<String>) -> Self {
        VectorError::Internal(msg.into())
    }

    pub fn errcode(&self) -> Errno {
        match self {
            VectorError::Internal(_) => Errno::Internal,
            VectorError::IllegalParameters(_) => Errno::IllegalParameters,
            VectorError::RaftNotFound(_) => Errno::RaftNotFound,
            VectorError::FileNotFoundReader(_) => Errno::FileNotFoundReader,
            VectorError::FileRead(_) => Errno::FileRead,
            VectorError::SnapshotNotFound(_) => Errno::VectorSnapshotNotFound,
            VectorError::SnapshotExist(_) => Errno::VectorSnapshotExist,
            VectorError::SnapshotInvalid(_) => Errno::VectorSnapshotInvalid,
            VectorError::NotNeedSnapshot => Errno::VectorNotNeedSnapshot,
            VectorError::NotSupport(_) => Errno::VectorNotSupport,
            VectorError::SnapshotBusy => Errno::VectorSnapshotBusy,
        }
    }

    /// Errors the install and pull loops treat as success.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            VectorError::SnapshotExist(_) | VectorError::NotNeedSnapshot
        )
    }

    pub fn to_pb(&self) -> PbError {
        PbError {
            errcode: self.errcode() as i32,
            errmsg: self.to_string(),
        }
    }

    /// Reconstruct from a wire error. `None` means the remote reported OK.
    pub fn from_pb(error: &PbError) -> Option<Self> {
        let errno = Errno::try_from(error.errcode).unwrap_or(Errno::Internal);
        let msg = error.errmsg.clone();
        match errno {
            Errno::Ok => None,
            Errno::Internal => Some(VectorError::Internal(msg)),
            Errno::IllegalParameters => Some(VectorError::IllegalParameters(msg)),
            Errno::RaftNotFound => Some(VectorError::RaftNotFound(msg)),
            Errno::FileNotFoundReader => Some(VectorError::FileNotFoundReader(msg)),
            Errno::FileRead => Some(VectorError::FileRead(msg)),
            Errno::VectorSnapshotNotFound => Some(VectorError::SnapshotNotFound(msg)),
            Errno::VectorSnapshotExist => Some(VectorError::SnapshotExist(msg)),
            Errno::VectorSnapshotInvalid => Some(VectorError::SnapshotInvalid(msg)),
            Errno::VectorNotNeedSnapshot => Some(VectorError::NotNeedSnapshot),
            Errno::VectorNotSupport => Some(VectorError::NotSupport(msg)),
            Errno::VectorSnapshotBusy => Some(VectorError::SnapshotBusy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errcode_round_trip() {
        let errors = vec![
            VectorError::Internal("boom".into()),
            VectorError::IllegalParameters("p".into()),
            VectorError::RaftNotFound("42".into()),
            VectorError::FileNotFoundReader("7".into()),
            VectorError::FileRead("f".into()),
            VectorError::SnapshotNotFound("42".into()),
            VectorError::SnapshotExist("42/100".into()),
            VectorError::SnapshotInvalid("bad name".into()),
            VectorError::NotNeedSnapshot,
            VectorError::NotSupport("ivf".into()),
            VectorError::SnapshotBusy,
        ];

        for err in errors {
            let pb = err.to_pb();
            let back = VectorError::from_pb(&pb).expect("non-ok error");
            assert_eq!(back.errcode(), err.errcode());
        }
    }

    #[test]
    fn test_ok_maps_to_none() {
        let pb = PbError {
            errcode: Errno::Ok as i32,
            errmsg: String::new(),
        };
        assert!(VectorError::from_pb(&pb).is_none());
    }

    #[test]
    fn test_benign_errors() {
        assert!(VectorError::SnapshotExist("dup".into()).is_benign());
        assert!(VectorError::NotNeedSnapshot.is_benign());
        assert!(!VectorError::Internal("x".into()).is_benign());
    }
}
