//! Protocol buffer definitions for the control-plane RPC surface

/// Matching engine admin service
pub mod matchengine {
    /// Version 1 of the admin API
    #[allow(missing_docs)]
    #[allow(missing_debug_implementations)]
    pub mod v1 {
        tonic::include_proto!("matchengine.v1");
    }
}

pub use matchengine::v1::{
    engine_admin_service_client::EngineAdminServiceClient,
    engine_admin_service_server::{EngineAdminService, EngineAdminServiceServer},
    HealthRequest, HealthResponse, RemoveRequest, RemoveResponse, RestoreRequest,
    RestoreResponse, SnapshotRequest, SnapshotResponse,
};
