use fill_protocol::ValveName;

/// How a valve responds to a repeated actuation command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleMode {
    /// Toggling sends the negation of the cached state.
    Invert,
    /// The driver flips the valve whenever it receives a command, so
    /// toggling re-sends the cached state unchanged.
    RepeatCurrent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValvePolicy {
    pub toggle: ToggleMode,
    /// Actuation state driven at the end of the launch sequence.
    pub after_launch: bool,
}

impl ValvePolicy {
    pub fn toggle_command(&self, cached: bool) -> bool {
        match self.toggle {
            ToggleMode::Invert => !cached,
            ToggleMode::RepeatCurrent => cached,
        }
    }
}

/// Per-valve wiring knowledge. Changing hardware should mean editing this
/// table, not the sequencer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValvePolicies {
    entries: [ValvePolicy; ValveName::COUNT],
}

const DEFAULT_POLICIES: [(ValveName, ValvePolicy); ValveName::COUNT] = [
    (
        ValveName::Sv1,
        ValvePolicy {
            toggle: ToggleMode::Invert,
            after_launch: true,
        },
    ),
    (
        ValveName::Sv2,
        ValvePolicy {
            toggle: ToggleMode::Invert,
            after_launch: false,
        },
    ),
    (
        ValveName::Sv3,
        ValvePolicy {
            toggle: ToggleMode::Invert,
            after_launch: false,
        },
    ),
    (
        ValveName::Sv4,
        ValvePolicy {
            toggle: ToggleMode::Invert,
            after_launch: false,
        },
    ),
    (
        ValveName::Sv5,
        ValvePolicy {
            toggle: ToggleMode::RepeatCurrent,
            after_launch: false,
        },
    ),
];

impl Default for ValvePolicies {
    fn default() -> Self {
        let mut entries = [ValvePolicy {
            toggle: ToggleMode::Invert,
            after_launch: false,
        }; ValveName::COUNT];
        for (valve, policy) in DEFAULT_POLICIES {
            entries[valve.index()] = policy;
        }
        Self { entries }
    }
}

impl ValvePolicies {
    pub fn get(&self, valve: ValveName) -> ValvePolicy {
        self.entries[valve.index()]
    }

    pub fn set(&mut self, valve: ValveName, policy: ValvePolicy) {
        self.entries[valve.index()] = policy;
    }

    pub fn iter(&self) -> impl Iterator<Item = (ValveName, ValvePolicy)> + '_ {
        ValveName::ALL.into_iter().map(|v| (v, self.get(v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_sv5_repeats_its_state() {
        let policies = ValvePolicies::default();
        for (valve, policy) in policies.iter() {
            let expected = if valve == ValveName::Sv5 {
                ToggleMode::RepeatCurrent
            } else {
                ToggleMode::Invert
            };
            assert_eq!(policy.toggle, expected, "{valve}");
        }
    }

    #[test]
    fn toggle_command_follows_mode() {
        let invert = ValvePolicy {
            toggle: ToggleMode::Invert,
            after_launch: false,
        };
        let repeat = ValvePolicy {
            toggle: ToggleMode::RepeatCurrent,
            after_launch: false,
        };
        assert!(invert.toggle_command(false));
        assert!(!invert.toggle_command(true));
        assert!(repeat.toggle_command(true));
        assert!(!repeat.toggle_command(false));
    }

    #[test]
    fn only_sv1_stays_actuated_after_launch() {
        let actuated: Vec<ValveName> = ValvePolicies::default()
            .iter()
            .filter(|(_, p)| p.after_launch)
            .map(|(v, _)| v)
            .collect();
        assert_eq!(actuated, vec![ValveName::Sv1]);
    }

    #[test]
    fn policies_are_editable_data() {
        let mut policies = ValvePolicies::default();
        policies.set(
            ValveName::Sv2,
            ValvePolicy {
                toggle: ToggleMode::RepeatCurrent,
                after_launch: true,
            },
        );
        assert_eq!(policies.get(ValveName::Sv2).toggle, ToggleMode::RepeatCurrent);
        assert_eq!(policies.get(ValveName::Sv5).toggle, ToggleMode::RepeatCurrent);
    }
}
