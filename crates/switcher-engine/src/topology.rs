//! Boundary ports owned by the controller and the link matching over them.

use switcher_graph::{GraphResult, MediaGraph};
use switcher_ipc::{Branch, Consumer, SwitchPhase};

/// Per-branch discovery state.
pub(crate) struct BranchSlot<P> {
    /// Boundary output port, set once on first discovery.
    pub port: Option<P>,

    /// Set once the branch has been linked to its first consumer.
    pub sink_claimed: bool,
}

impl<P> Default for BranchSlot<P> {
    fn default() -> Self {
        Self {
            port: None,
            sink_claimed: false,
        }
    }
}

/// All mutable controller state. Lives behind the controller mutex.
pub(crate) struct Topology<P> {
    pub live: BranchSlot<P>,
    pub file: BranchSlot<P>,
    pub display: Option<P>,
    pub discard: Option<P>,
    pub phase: SwitchPhase,
}

impl<P: Clone + PartialEq> Topology<P> {
    pub fn new() -> Self {
        Self {
            live: BranchSlot::default(),
            file: BranchSlot::default(),
            display: None,
            discard: None,
            phase: SwitchPhase::AwaitingBoth,
        }
    }

    pub fn slot(&self, branch: Branch) -> &BranchSlot<P> {
        match branch {
            Branch::Live => &self.live,
            Branch::File => &self.file,
        }
    }

    pub fn slot_mut(&mut self, branch: Branch) -> &mut BranchSlot<P> {
        match branch {
            Branch::Live => &mut self.live,
            Branch::File => &mut self.file,
        }
    }

    pub fn consumer(&self, consumer: Consumer) -> Option<&P> {
        match consumer {
            Consumer::Display => self.display.as_ref(),
            Consumer::Discard => self.discard.as_ref(),
        }
    }

    pub fn set_consumer(&mut self, consumer: Consumer, port: P) {
        match consumer {
            Consumer::Display => self.display = Some(port),
            Consumer::Discard => self.discard = Some(port),
        }
    }

    /// The branch whose boundary port is linked to `consumer`.
    pub fn feeder<G>(&self, graph: &G, consumer: Consumer) -> Option<Branch>
    where
        G: MediaGraph<Port = P>,
    {
        let peer = graph.peer(self.consumer(consumer)?)?;
        [Branch::Live, Branch::File]
            .into_iter()
            .find(|b| self.slot(*b).port.as_ref() == Some(&peer))
    }

    /// All four boundary ports, once both branches are discovered.
    pub fn matching(&self) -> Option<Matching<P>> {
        Some(Matching {
            live: self.live.port.clone()?,
            file: self.file.port.clone()?,
            display: self.display.clone()?,
            discard: self.discard.clone()?,
        })
    }
}

/// The four boundary ports between which links form a perfect matching.
pub(crate) struct Matching<P> {
    pub live: P,
    pub file: P,
    pub display: P,
    pub discard: P,
}

impl<P: PartialEq> Matching<P> {
    pub fn branch(&self, branch: Branch) -> &P {
        match branch {
            Branch::Live => &self.live,
            Branch::File => &self.file,
        }
    }

    /// The branch feeding the display, if the other one feeds the discard
    /// sink.
    pub fn active<G>(&self, graph: &G) -> Option<Branch>
    where
        G: MediaGraph<Port = P>,
    {
        let on_display = graph.peer(&self.display)?;
        let on_discard = graph.peer(&self.discard)?;

        if on_display == self.live && on_discard == self.file {
            Some(Branch::Live)
        } else if on_display == self.file && on_discard == self.live {
            Some(Branch::File)
        } else {
            None
        }
    }

    /// Put `onto_display` on the display and the other branch on the
    /// discard sink.
    ///
    /// Unlinks both current links, then links both new ones. Callers hold
    /// the controller mutex for the whole exchange; a failure part way
    /// through is not rolled back.
    pub fn relink<G>(&self, graph: &G, onto_display: Branch) -> GraphResult<()>
    where
        G: MediaGraph<Port = P>,
    {
        let incoming = self.branch(onto_display);
        let outgoing = self.branch(onto_display.other());

        graph.unlink(outgoing, &self.display)?;
        graph.unlink(incoming, &self.discard)?;

        graph.link(incoming, &self.display)?;
        graph.link(outgoing, &self.discard)?;

        Ok(())
    }
}
