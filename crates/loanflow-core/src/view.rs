use std::sync::Arc;

use loanflow_types::StepNumber;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::FlowError;

/// What a step view needs to render.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewState {
    pub current_step: StepNumber,
    pub max_step_reached: StepNumber,
    pub total_steps: StepNumber,
    pub can_advance: bool,
    pub completed: bool,
    pub last_error: Option<FlowError>,
}

pub trait StepView: Send + Sync + 'static {
    fn render(&self, state: &ViewState);
}

/// Renders the current state, then every change until the sequencer is dropped.
pub fn bind_view(
    mut states: watch::Receiver<ViewState>,
    view: Arc<dyn StepView>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let initial = states.borrow_and_update().clone();
        view.render(&initial);
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            view.render(&state);
        }
    })
}
