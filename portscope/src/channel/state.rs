use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Drained data is rendered as it arrives.
    Active,
    /// The source is closed. Data already buffered is still rendered.
    Paused,
    /// The operator scrolled away; data is held until they come back.
    Frozen,
    /// Like `Frozen`, and new data raises activity notifications.
    Minimized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateCommand {
    Pause,
    Resume,
    Freeze,
    ScrolledToBottom,
    Minimize,
    Restore,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("cannot {command:?} a channel that is {state:?}")]
pub struct InvalidTransition {
    pub state: ChannelState,
    pub command: StateCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ChannelState,
    pub to: ChannelState,
}

impl Transition {
    /// Held text must be rendered when leaving a withholding state.
    pub fn replays_held(&self) -> bool {
        self.from.withholds() && !self.to.withholds()
    }

    pub fn closes_source(&self) -> bool {
        self.from != ChannelState::Paused && self.to == ChannelState::Paused
    }

    pub fn opens_source(&self) -> bool {
        self.from == ChannelState::Paused && self.to != ChannelState::Paused
    }
}

impl ChannelState {
    /// Whether drained data goes to the held buffer instead of the sink.
    pub fn withholds(self) -> bool {
        matches!(self, ChannelState::Frozen | ChannelState::Minimized)
    }

    pub fn apply(self, command: StateCommand) -> Result<Transition, InvalidTransition> {
        use ChannelState::*;
        use StateCommand::*;
        let to = match (self, command) {
            (Active, Pause) => Paused,
            (Paused, Resume) => Active,
            (Active, Freeze) => Frozen,
            (Active | Frozen, ScrolledToBottom) => Active,
            (Active | Frozen, Minimize) => Minimized,
            (Minimized, Restore) => Active,
            (state, command) => return Err(InvalidTransition { state, command }),
        };
        Ok(Transition { from: self, to })
    }
}

#[cfg(test)]
mod tests {
    use super::ChannelState::*;
    use super::StateCommand::*;
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Active, Pause, Paused)]
    #[case(Paused, Resume, Active)]
    #[case(Active, Freeze, Frozen)]
    #[case(Frozen, ScrolledToBottom, Active)]
    #[case(Active, ScrolledToBottom, Active)]
    #[case(Active, Minimize, Minimized)]
    #[case(Frozen, Minimize, Minimized)]
    #[case(Minimized, Restore, Active)]
    fn allowed(#[case] from: ChannelState, #[case] command: StateCommand, #[case] to: ChannelState) {
        assert_eq!(from.apply(command), Ok(Transition { from, to }));
    }

    #[rstest]
    #[case(Paused, Freeze)]
    #[case(Paused, Pause)]
    #[case(Paused, Minimize)]
    #[case(Frozen, Pause)]
    #[case(Minimized, Pause)]
    #[case(Minimized, ScrolledToBottom)]
    #[case(Active, Resume)]
    #[case(Active, Restore)]
    fn rejected(#[case] state: ChannelState, #[case] command: StateCommand) {
        assert_eq!(state.apply(command), Err(InvalidTransition { state, command }));
    }

    #[test]
    fn side_effects() {
        let unfreeze = Frozen.apply(ScrolledToBottom).unwrap();
        assert!(unfreeze.replays_held());
        assert!(!unfreeze.opens_source());

        let minimize = Frozen.apply(Minimize).unwrap();
        assert!(!minimize.replays_held());

        let pause = Active.apply(Pause).unwrap();
        assert!(pause.closes_source() && !pause.replays_held());
        assert!(Paused.apply(Resume).unwrap().opens_source());
    }
}
