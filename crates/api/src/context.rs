use gatehouse_auth::Principal;

/// Per-request state threaded through the guard pipeline.
///
/// Built fresh for every request; guards enrich it in order and the
/// principal is copied into the request extensions once every guard passed.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    principal: Option<Principal>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn set_principal(&mut self, principal: Principal) {
        self.principal = Some(principal);
    }

    pub fn into_principal(self) -> Option<Principal> {
        self.principal
    }
}

/// A request body that passed the validate guard.
///
/// Handlers take it as `Extension(Validated(body))`.
#[derive(Debug, Clone)]
pub struct Validated<T>(pub T);
