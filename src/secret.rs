//! Secret/API-key validation (thin adapter). No format or liveness
//! checking — presence and non-emptiness only.

pub fn validate_credential_present(env_var: &str) -> bool {
    std::env::var(env_var).map(|v| !v.is_empty()).unwrap_or(false)
}
