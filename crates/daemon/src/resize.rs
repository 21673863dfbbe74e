//! Viewport resize coordination.
//!
//! Translates viewport-dimension events from the client into backend
//! `resize` calls. Resize is fire-and-forget with last-write-wins
//! semantics; events arriving while no shell is allocated are recorded and
//! applied once streaming begins, events in any other phase are a logged
//! no-op.

use protocol::messages::ViewportDims;
use tracing::debug;

use crate::bridge::Phase;

/// Tracks the most recent viewport dimensions for one connection.
#[derive(Debug, Default)]
pub struct ResizeCoordinator {
    latest: Option<ViewportDims>,
    /// A change arrived while the shell was not yet allocated.
    pending: bool,
}

impl ResizeCoordinator {
    /// Creates a coordinator with no recorded dimensions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the connect-time dimensions. These size the initial shell
    /// allocation and are not flushed again afterwards.
    pub fn record_initial(&mut self, dims: ViewportDims) {
        self.latest = Some(dims);
        self.pending = false;
    }

    /// Handles a viewport change in the given connection phase.
    ///
    /// Returns the dimensions to forward to the backend now, or `None`
    /// when nothing should be forwarded: while connecting or pre-shell
    /// the change is recorded for the implicit apply on entering
    /// Streaming, anywhere else it is dropped.
    pub fn on_viewport_change(&mut self, dims: ViewportDims, phase: Phase) -> Option<ViewportDims> {
        match phase {
            Phase::Streaming => {
                self.latest = Some(dims);
                self.pending = false;
                Some(dims)
            }
            Phase::Connecting | Phase::Ready => {
                self.latest = Some(dims);
                self.pending = true;
                None
            }
            _ => {
                debug!(phase = ?phase, rows = dims.rows, cols = dims.cols, "Ignoring resize outside a live session");
                None
            }
        }
    }

    /// The most recently recorded dimensions.
    pub fn latest(&self) -> Option<ViewportDims> {
        self.latest
    }

    /// Dimensions recorded since the shell allocation was requested, if
    /// any. Returns at most the latest value; superseded intermediates are
    /// never handed out.
    pub fn take_pending(&mut self) -> Option<ViewportDims> {
        if self.pending {
            self.pending = false;
            self.latest
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_dims_are_not_pending() {
        let mut resize = ResizeCoordinator::new();
        resize.record_initial(ViewportDims::cells(24, 80));

        assert_eq!(resize.latest(), Some(ViewportDims::cells(24, 80)));
        assert_eq!(resize.take_pending(), None);
    }

    #[test]
    fn test_streaming_forwards_immediately() {
        let mut resize = ResizeCoordinator::new();
        resize.record_initial(ViewportDims::cells(24, 80));

        let dims = ViewportDims::cells(50, 120);
        assert_eq!(resize.on_viewport_change(dims, Phase::Streaming), Some(dims));
        assert_eq!(resize.take_pending(), None);
    }

    #[test]
    fn test_pre_shell_changes_flush_once_with_last_write_wins() {
        let mut resize = ResizeCoordinator::new();
        resize.record_initial(ViewportDims::cells(24, 80));

        // Several changes arrive before the shell is up; only the last
        // one may ever reach the backend.
        assert_eq!(
            resize.on_viewport_change(ViewportDims::cells(30, 90), Phase::Ready),
            None
        );
        assert_eq!(
            resize.on_viewport_change(ViewportDims::cells(40, 100), Phase::Ready),
            None
        );
        assert_eq!(
            resize.on_viewport_change(ViewportDims::cells(50, 110), Phase::Ready),
            None
        );

        assert_eq!(resize.take_pending(), Some(ViewportDims::cells(50, 110)));
        // Flushed exactly once.
        assert_eq!(resize.take_pending(), None);
    }

    #[test]
    fn test_out_of_phase_resize_is_dropped() {
        let mut resize = ResizeCoordinator::new();

        for phase in [Phase::Idle, Phase::Closing, Phase::Closed, Phase::Errored] {
            assert_eq!(
                resize.on_viewport_change(ViewportDims::cells(50, 120), phase),
                None
            );
            assert_eq!(resize.take_pending(), None);
        }
        assert_eq!(resize.latest(), None);
    }

    #[test]
    fn test_connecting_changes_supersede_connect_dims() {
        let mut resize = ResizeCoordinator::new();
        resize.record_initial(ViewportDims::cells(24, 80));

        resize.on_viewport_change(ViewportDims::cells(48, 160), Phase::Connecting);
        assert_eq!(resize.latest(), Some(ViewportDims::cells(48, 160)));
        assert_eq!(resize.take_pending(), Some(ViewportDims::cells(48, 160)));
    }
}
