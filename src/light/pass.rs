//! Pass lists driving multi-pass light processing.

use crate::geometry::CubemapFace;
use anyhow::{Result, bail};

/// What the renderer should do during a lighting or fill pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LightingOp {
    /// Nothing needs to be rendered for this pass.
    Skip,
    /// Render shadow casters into the shadow map of the pass's frustum.
    FillShadowMap,
    /// Apply the light's contribution.
    ProcessLight,
}

/// Which part of the light a pass covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassFrustum {
    /// The whole light volume without per-face splitting.
    All,
    Face(CubemapFace),
}

/// One entry in a pass list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LightingPass {
    pub op: LightingOp,
    pub frustum: PassFrustum,
    pub sub_pass: u32,
}

/// Tracks progress through a pass list built at the start of a fill or
/// lighting cycle. Passes are consumed through strictly paired begin and end
/// calls.
#[derive(Clone, Debug, Default)]
pub struct PassTracker {
    state: PassState,
    passes: Vec<LightingPass>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum PassState {
    #[default]
    Idle,
    BetweenPasses,
    InPass(usize),
}

impl LightingPass {
    pub fn new(op: LightingOp, frustum: PassFrustum, sub_pass: u32) -> Self {
        Self {
            op,
            frustum,
            sub_pass,
        }
    }

    pub fn fill(face: CubemapFace, sub_pass: u32) -> Self {
        Self::new(LightingOp::FillShadowMap, PassFrustum::Face(face), sub_pass)
    }

    pub fn process(frustum: PassFrustum) -> Self {
        Self::new(LightingOp::ProcessLight, frustum, 0)
    }
}

impl PassTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a cycle has been started and not yet ended.
    pub fn is_active(&self) -> bool {
        self.state != PassState::Idle
    }

    /// Whether a pass has been begun and not yet ended.
    pub fn in_pass(&self) -> bool {
        matches!(self.state, PassState::InPass(_))
    }

    /// Starts a new cycle with an empty pass list.
    ///
    /// # Errors
    /// Returns an error if a cycle is already active.
    pub fn begin(&mut self) -> Result<()> {
        if self.is_active() {
            bail!("Tried to begin pass cycle while another cycle is active");
        }
        self.passes.clear();
        self.state = PassState::BetweenPasses;
        Ok(())
    }

    /// Appends a pass to the list of the active cycle.
    pub fn push(&mut self, pass: LightingPass) {
        self.passes.push(pass);
    }

    pub fn passes(&self) -> &[LightingPass] {
        &self.passes
    }

    pub fn n_passes(&self) -> usize {
        self.passes.len()
    }

    /// Returns the pass at the given index of the active cycle's list.
    ///
    /// # Errors
    /// Returns an error if no cycle is active, a pass is already in progress
    /// or the index is out of range.
    pub fn pass_to_begin(&self, pass_idx: usize) -> Result<LightingPass> {
        match self.state {
            PassState::Idle => bail!("Tried to begin pass {} outside of a pass cycle", pass_idx),
            PassState::InPass(current) => bail!(
                "Tried to begin pass {} before ending pass {}",
                pass_idx,
                current
            ),
            PassState::BetweenPasses => {}
        }
        self.passes.get(pass_idx).copied().ok_or_else(|| {
            anyhow::anyhow!(
                "Tried to begin pass {} of a cycle with {} passes",
                pass_idx,
                self.passes.len()
            )
        })
    }

    /// Marks the pass with the given index as the current one.
    ///
    /// # Panics
    /// If the pass could not have been obtained from
    /// [`pass_to_begin`](Self::pass_to_begin).
    pub fn mark_begun(&mut self, pass_idx: usize) {
        assert!(
            self.state == PassState::BetweenPasses && pass_idx < self.passes.len(),
            "Tried to mark invalid pass {} as begun",
            pass_idx
        );
        self.state = PassState::InPass(pass_idx);
    }

    /// Returns the pass currently in progress.
    pub fn current_pass(&self) -> Option<LightingPass> {
        match self.state {
            PassState::InPass(idx) => Some(self.passes[idx]),
            PassState::Idle | PassState::BetweenPasses => None,
        }
    }

    /// Ends the pass in progress.
    ///
    /// # Errors
    /// Returns an error if no pass is in progress.
    pub fn end_pass(&mut self) -> Result<LightingPass> {
        let PassState::InPass(idx) = self.state else {
            bail!("Tried to end pass without a pass in progress");
        };
        self.state = PassState::BetweenPasses;
        Ok(self.passes[idx])
    }

    /// Ends the active cycle, ending any pass still in progress.
    ///
    /// # Returns
    /// The pass that was still in progress, if any.
    ///
    /// # Errors
    /// Returns an error if no cycle is active.
    pub fn end(&mut self) -> Result<Option<LightingPass>> {
        let open_pass = match self.state {
            PassState::Idle => bail!("Tried to end pass cycle without an active cycle"),
            PassState::InPass(idx) => Some(self.passes[idx]),
            PassState::BetweenPasses => None,
        };
        self.state = PassState::Idle;
        self.passes.clear();
        Ok(open_pass)
    }
}
