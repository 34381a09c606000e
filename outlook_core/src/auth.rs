use std::collections::HashMap;

/// Credentials and token material for one provider, keyed by field name
/// (`access_token`, `refresh_token`, `expires_at`, `client_id`, `tenant_id`, ...).
pub type AuthDetails = HashMap<String, String>;
