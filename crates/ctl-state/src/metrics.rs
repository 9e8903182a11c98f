use crate::card::{Operation, Report};
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

#[derive(Clone)]
pub struct StateMetrics {
    pub controls_stored: IntCounter,
    pub controls_restored: IntCounter,
    pub controls_skipped: IntCounter,
    pub id_mismatches: IntCounter,
    pub cards_failed: IntCounter,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub state: StateMetrics,
}

fn counter(name: &str, help: &str) -> Result<IntCounter, String> {
    IntCounter::new(name, help).map_err(|e| format!("metrics init error: {e}"))
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let state = StateMetrics {
            controls_stored: counter(
                "actl_controls_stored",
                "Controls written to the state document",
            )?,
            controls_restored: counter(
                "actl_controls_restored",
                "Controls restored (or validated on a dry run)",
            )?,
            controls_skipped: counter(
                "actl_controls_skipped",
                "Controls left alone: unreadable, read-only, inactive or failed under force",
            )?,
            id_mismatches: counter(
                "actl_id_mismatches",
                "Identity fields that differed between document and card",
            )?,
            cards_failed: counter("actl_cards_failed", "Cards whose store or restore failed")?,
        };
        for c in [
            &state.controls_stored,
            &state.controls_restored,
            &state.controls_skipped,
            &state.id_mismatches,
            &state.cards_failed,
        ] {
            registry
                .register(Box::new(c.clone()))
                .map_err(|e| format!("metrics register error: {e}"))?;
        }
        Ok(Self { registry, state })
    }

    pub fn record(&self, report: &Report) {
        for card in &report.cards {
            let controls = match report.operation {
                Operation::Store => &self.state.controls_stored,
                Operation::Restore => &self.state.controls_restored,
            };
            controls.inc_by(card.controls as u64);
            self.state.controls_skipped.inc_by(card.skipped as u64);
            self.state.id_mismatches.inc_by(card.mismatches as u64);
            if card.is_failed() {
                self.state.cards_failed.inc();
            }
        }
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::{CardOutcome, CardStatus};

    #[test]
    fn record_restore_report() -> anyhow::Result<()> {
        let hub = MetricsHub::new().map_err(anyhow::Error::msg)?;
        let mut report = Report::new(Operation::Restore);
        report.cards.push(CardOutcome {
            index: 0,
            id: "PCH".into(),
            status: CardStatus::Ok,
            controls: 12,
            skipped: 2,
            mismatches: 1,
            count_mismatch: false,
        });
        report.cards.push(CardOutcome {
            index: 1,
            id: "USB".into(),
            status: CardStatus::Failed("control #3: boom".into()),
            controls: 0,
            skipped: 0,
            mismatches: 0,
            count_mismatch: false,
        });
        hub.record(&report);
        assert_eq!(hub.state.controls_restored.get(), 12);
        assert_eq!(hub.state.controls_stored.get(), 0);
        assert_eq!(hub.state.cards_failed.get(), 1);
        let text = hub.encode_text();
        assert!(text.contains("actl_controls_restored 12"));
        assert!(text.contains("actl_id_mismatches 1"));
        Ok(())
    }
}
