/// Caller identity asserted by the upstream gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: i64,
    pub is_privileged: bool,
}

impl CallerIdentity {
    pub fn is_admin(&self) -> bool {
        self.is_privileged
    }
}
