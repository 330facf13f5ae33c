//! Pass-through for pre-rendered findings from emulator log files.

use crate::findings::{Finding, FindingSink};

/// Forwards log lines to the sink unchanged.
pub struct LogPassthrough {
    sink: FindingSink,
}

impl LogPassthrough {
    pub fn new(sink: FindingSink) -> Self {
        LogPassthrough { sink }
    }

    /// Forward one log line as a finding.
    pub fn feed_line(&mut self, line: String) {
        (self.sink)(Finding::log_line(line));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::Metric;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_lines_forward_verbatim() {
        let found = Arc::new(Mutex::new(Vec::new()));
        let sink_found = Arc::clone(&found);
        let sink: FindingSink = Arc::new(move |f| sink_found.lock().unwrap().push(f));

        let mut passthrough = LogPassthrough::new(sink);
        passthrough.feed_line("api call: VirtualAlloc".into());

        let found = found.lock().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].metric,
            Metric::LogLine("api call: VirtualAlloc".into())
        );
        assert_eq!(found[0].to_string(), "api call: VirtualAlloc");
    }
}
