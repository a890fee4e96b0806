// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SwitchyardError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("network backend error: {0}")]
    BackendError(String),

    #[error("failed to build annotation patch: {0}")]
    PatchError(#[from] serde_json::Error),

    #[error("startup failed: {0}")]
    StartupError(String),
}

pub type Result<T> = std::result::Result<T, SwitchyardError>;
