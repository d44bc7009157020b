//! Maps the thread's active stage to the controller that owns it.

use super::stages::{
    CloserController, IntakeController, LocatorController, LogisticsController, StageController,
};
use super::state::Stage;

/// Where a turn goes.
pub enum Route<'a> {
    Controller(&'a dyn StageController),
    /// Ended or escalated; no controller runs.
    Terminal(Stage),
}

pub struct Router {
    intake: IntakeController,
    locator: LocatorController,
    logistics: LogisticsController,
    closer: CloserController,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            intake: IntakeController::new(),
            locator: LocatorController::new(),
            logistics: LogisticsController::new(),
            closer: CloserController::new(),
        }
    }

    /// Pure lookup: an unset stage routes to Intake.
    pub fn select(&self, active: Option<Stage>) -> Route<'_> {
        match active.unwrap_or(Stage::Intake) {
            Stage::Intake => Route::Controller(&self.intake),
            Stage::Locator => Route::Controller(&self.locator),
            Stage::Logistics => Route::Controller(&self.logistics),
            Stage::Closer => Route::Controller(&self.closer),
            terminal @ (Stage::Ended | Stage::Escalated) => Route::Terminal(terminal),
        }
    }
}
