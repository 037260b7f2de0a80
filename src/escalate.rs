use std::fmt;

/// A predicate over one line of child output.
pub type LinePredicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// The line classifiers a become method contributes to the negotiation.
///
/// The negotiation loop itself knows nothing about `sudo` and friends; it
/// asks these four questions about every line it sees. The stock set built
/// by [`BecomePredicates::for_method`] covers the common methods, and a
/// custom escalation wrapper can supply its own closures instead.
pub struct BecomePredicates {
    /// Is this line the password prompt?
    pub check_password_prompt: LinePredicate,

    /// Is this line the success marker?
    pub check_become_success: LinePredicate,

    /// Is this line the method complaining about a wrong password?
    pub check_incorrect_password: LinePredicate,

    /// Is this line the method demanding a password we did not configure?
    pub check_missing_password: LinePredicate,
}

impl fmt::Debug for BecomePredicates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BecomePredicates").finish_non_exhaustive()
    }
}

impl BecomePredicates {
    /// Build the stock predicate set for `method`, seeded with the password
    /// prompt and success marker from the play context.
    ///
    /// A `None` seed disables the corresponding predicate, and methods we
    /// have no error vocabulary for never match the error predicates.
    pub fn for_method(method: &str, prompt: Option<&str>, success_key: Option<&str>) -> Self {
        let prompt = prompt.map(str::to_owned);
        let success_key = success_key.map(str::to_owned);
        let incorrect = incorrect_password_marker(method);
        let missing = missing_password_marker(method);

        Self {
            check_password_prompt: Box::new(move |line| {
                prompt.as_deref().is_some_and(|p| line.starts_with(p))
            }),
            check_become_success: Box::new(move |line| {
                success_key.as_deref().is_some_and(|k| line.contains(k))
            }),
            check_incorrect_password: Box::new(move |line| {
                incorrect.is_some_and(|m| line.contains(m))
            }),
            check_missing_password: Box::new(move |line| {
                missing.is_some_and(|m| line.contains(m))
            }),
        }
    }
}

fn incorrect_password_marker(method: &str) -> Option<&'static str> {
    match method {
        "sudo" => Some("Sorry, try again."),
        "su" => Some("Authentication failure"),
        "doas" => Some("Permission denied"),
        _ => None,
    }
}

fn missing_password_marker(method: &str) -> Option<&'static str> {
    match method {
        "sudo" => Some("sudo: a password is required"),
        "doas" => Some("Authorization required"),
        _ => None,
    }
}
