use crate::escalate::BecomePredicates;
use crate::diag::Diagnostics;

/// Phases of a privilege-escalation negotiation, in the only order they may
/// occur. States are totally ordered; the run loop never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum NegotiationState {
    /// A password prompt is expected before anything else.
    AwaitingPrompt,
    /// The password went out (or none was needed); now waiting for the
    /// success marker or an error line.
    AwaitingEscalation,
    /// Escalation is settled; pipelined input may be sent.
    ReadyToSend,
    /// Nothing left to negotiate, just drain output until the child exits.
    AwaitingExit,
}

impl NegotiationState {
    pub(crate) fn advance(&mut self) {
        *self = match *self {
            NegotiationState::AwaitingPrompt => NegotiationState::AwaitingEscalation,
            NegotiationState::AwaitingEscalation => NegotiationState::ReadyToSend,
            _ => NegotiationState::AwaitingExit,
        };
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            NegotiationState::AwaitingPrompt => "awaiting_prompt",
            NegotiationState::AwaitingEscalation => "awaiting_escalation",
            NegotiationState::ReadyToSend => "ready_to_send",
            NegotiationState::AwaitingExit => "awaiting_exit",
        }
    }
}

/// One-shot events raised by line classification. Each transition that acts
/// on a flag resets it.
#[derive(Debug, Default)]
pub(crate) struct Flags {
    pub(crate) become_prompt: bool,
    pub(crate) become_success: bool,
    pub(crate) become_error: bool,
    pub(crate) become_nopasswd_error: bool,
}

/// Which child stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    Stdout,
    Stderr,
}

impl Source {
    fn index(self) -> usize {
        match self {
            Source::Stdout => 0,
            Source::Stderr => 1,
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Source::Stdout => "stdout",
            Source::Stderr => "stderr",
        }
    }
}

/// Splits raw child output into lines, raises negotiation [`Flags`], and
/// strips prompt/success lines from what the caller gets to see.
///
/// Error lines stay in the output so the user can read them. A trailing
/// segment without a newline is classified (a prompt rarely ends in one)
/// but withheld from the visible output and re-examined joined with the
/// next chunk from the same stream.
pub(crate) struct OutputScanner<'a> {
    predicates: &'a BecomePredicates,
    prompt_set: bool,
    success_set: bool,
    sudoable: bool,
    pub(crate) flags: Flags,
    remainders: [Vec<u8>; 2],
}

impl<'a> OutputScanner<'a> {
    pub(crate) fn new(
        predicates: &'a BecomePredicates,
        prompt_set: bool,
        success_set: bool,
        sudoable: bool,
    ) -> Self {
        Self {
            predicates,
            prompt_set,
            success_set,
            sudoable,
            flags: Flags::default(),
            remainders: [Vec::new(), Vec::new()],
        }
    }

    /// Classify `chunk` and return the bytes that remain visible.
    pub(crate) fn scan(
        &mut self,
        source: Source,
        state: NegotiationState,
        chunk: &[u8],
        diag: &dyn Diagnostics,
    ) -> Vec<u8> {
        let mut buf = std::mem::take(&mut self.remainders[source.index()]);
        buf.extend_from_slice(chunk);

        let mut kept: Vec<&[u8]> = Vec::new();
        for segment in buf.split_inclusive(|&b| b == b'\n') {
            let line = String::from_utf8_lossy(segment);
            let mut suppress = false;

            if self.prompt_set && (self.predicates.check_password_prompt)(&line) {
                self.log_match(diag, "become_prompt", source, state, &line);
                self.flags.become_prompt = true;
                suppress = true;
            } else if self.success_set && (self.predicates.check_become_success)(&line) {
                self.log_match(diag, "become_success", source, state, &line);
                self.flags.become_success = true;
                suppress = true;
            } else if self.sudoable && (self.predicates.check_incorrect_password)(&line) {
                self.log_match(diag, "become_error", source, state, &line);
                self.flags.become_error = true;
            } else if self.sudoable && (self.predicates.check_missing_password)(&line) {
                self.log_match(diag, "become_nopasswd_error", source, state, &line);
                self.flags.become_nopasswd_error = true;
            }

            if !suppress {
                kept.push(segment);
            }
        }

        // Chunks usually end on a line boundary, but an incomplete tail must
        // wait for the rest of its line before it can go to the caller.
        let mut remainder = Vec::new();
        if let Some(last) = kept.last() {
            if !last.ends_with(b"\n") {
                remainder = last.to_vec();
                kept.pop();
            }
        }

        let visible = kept.concat();
        self.remainders[source.index()] = remainder;
        visible
    }

    /// Hand back the held partial line once classification is over.
    pub(crate) fn take_remainder(&mut self, source: Source) -> Vec<u8> {
        std::mem::take(&mut self.remainders[source.index()])
    }

    fn log_match(
        &self,
        diag: &dyn Diagnostics,
        flag: &str,
        source: Source,
        state: NegotiationState,
        line: &str,
    ) {
        diag.debug(&format!(
            "{}: (source={}, state={}): '{}'",
            flag,
            source.name(),
            state.name(),
            line.trim_end_matches(['\r', '\n'])
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::RecordingDiagnostics;

    fn predicates() -> BecomePredicates {
        BecomePredicates::for_method("sudo", Some("Password:"), Some("BECOME-SUCCESS-abc"))
    }

    fn scan(
        scanner: &mut OutputScanner<'_>,
        state: NegotiationState,
        chunk: &[u8],
    ) -> Vec<u8> {
        scanner.scan(Source::Stdout, state, chunk, &RecordingDiagnostics::default())
    }

    #[test]
    fn prompt_is_flagged_and_suppressed() {
        let p = predicates();
        let mut scanner = OutputScanner::new(&p, true, true, true);

        let visible = scan(&mut scanner, NegotiationState::AwaitingPrompt, b"Password: ");
        assert!(visible.is_empty());
        assert!(scanner.flags.become_prompt);
        // suppressed lines are gone for good, not held as remainder
        assert!(scanner.take_remainder(Source::Stdout).is_empty());
    }

    #[test]
    fn success_line_is_suppressed_but_neighbours_survive() {
        let p = predicates();
        let mut scanner = OutputScanner::new(&p, true, true, true);

        let visible = scan(
            &mut scanner,
            NegotiationState::AwaitingEscalation,
            b"before\nBECOME-SUCCESS-abc\nafter\n",
        );
        assert_eq!(visible, b"before\nafter\n");
        assert!(scanner.flags.become_success);
        assert!(!scanner.flags.become_prompt);
    }

    #[test]
    fn error_lines_stay_visible() {
        let p = predicates();
        let mut scanner = OutputScanner::new(&p, true, true, true);

        let visible = scan(
            &mut scanner,
            NegotiationState::AwaitingEscalation,
            b"Sorry, try again.\n",
        );
        assert_eq!(visible, b"Sorry, try again.\n");
        assert!(scanner.flags.become_error);
    }

    #[test]
    fn not_sudoable_means_no_error_flags() {
        let p = predicates();
        let mut scanner = OutputScanner::new(&p, true, true, false);

        let visible = scan(
            &mut scanner,
            NegotiationState::AwaitingEscalation,
            b"Sorry, try again.\nsudo: a password is required\n",
        );
        assert_eq!(visible, b"Sorry, try again.\nsudo: a password is required\n");
        assert!(!scanner.flags.become_error);
        assert!(!scanner.flags.become_nopasswd_error);
    }

    #[test]
    fn partial_line_waits_for_the_rest() {
        let p = predicates();
        let mut scanner = OutputScanner::new(&p, true, true, true);

        let visible = scan(&mut scanner, NegotiationState::AwaitingEscalation, b"BECOME-");
        assert!(visible.is_empty());

        let visible = scan(
            &mut scanner,
            NegotiationState::AwaitingEscalation,
            b"SUCCESS-abc\ntail",
        );
        assert!(visible.is_empty());
        assert!(scanner.flags.become_success);
        assert_eq!(scanner.take_remainder(Source::Stdout), b"tail");
    }

    #[test]
    fn streams_keep_separate_remainders() {
        let p = predicates();
        let mut scanner = OutputScanner::new(&p, true, true, true);
        let diag = RecordingDiagnostics::default();

        scanner.scan(Source::Stdout, NegotiationState::AwaitingPrompt, b"out", &diag);
        scanner.scan(Source::Stderr, NegotiationState::AwaitingPrompt, b"err", &diag);

        assert_eq!(scanner.take_remainder(Source::Stdout), b"out");
        assert_eq!(scanner.take_remainder(Source::Stderr), b"err");
    }

    #[test]
    fn states_are_ordered_and_saturate() {
        use NegotiationState::*;

        assert!(AwaitingPrompt < AwaitingEscalation);
        assert!(AwaitingEscalation < ReadyToSend);
        assert!(ReadyToSend < AwaitingExit);

        let mut state = AwaitingPrompt;
        state.advance();
        assert_eq!(state, AwaitingEscalation);
        state.advance();
        assert_eq!(state, ReadyToSend);
        state.advance();
        assert_eq!(state, AwaitingExit);
        state.advance();
        assert_eq!(state, AwaitingExit);
    }
}
