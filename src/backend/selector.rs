// Copyright 2026 BadCompany
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::core::errors::{OrchestratorError, Result};
use crate::core::models::{BackendKind, BackendPreference};

/// Chooses the backend for one submission. Evaluated per call.
pub fn select(requested: BackendPreference, credentials_available: bool) -> Result<BackendKind> {
    match (requested, credentials_available) {
        (BackendPreference::Local, _) => Ok(BackendKind::Local),
        (BackendPreference::Remote, true) => Ok(BackendKind::Remote),
        (BackendPreference::Remote, false) => Err(OrchestratorError::Configuration(
            "remote backend requested but no remote credentials are available".to_string(),
        )),
        (BackendPreference::Auto, true) => Ok(BackendKind::Remote),
        (BackendPreference::Auto, false) => Ok(BackendKind::Local),
    }
}
