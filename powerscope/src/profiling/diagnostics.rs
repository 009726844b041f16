use std::io::{self, Write};

use super::ring_buffer::ControlSnapshot;
use super::sample_decoder::CallChainRecord;
use super::callchain::hex_token;
use crate::symbolization::Resolve;

/// Human-readable dump of ring state and every sample (`--dump`)
///
/// Replaces the report rows: each tick prints the control page followed by
/// each decoded call chain, one frame per line with its resolved symbol.
pub struct DumpWriter<W: Write> {
    out: W,
    ticks: u64,
}

impl<W: Write> DumpWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, ticks: 0 }
    }

    /// Print one tick's worth of diagnostics
    ///
    /// # Errors
    /// Returns an error if the sink rejects the write
    pub fn write_tick(
        &mut self,
        control: &ControlSnapshot,
        chains: &[CallChainRecord],
        resolver: &dyn Resolve,
    ) -> io::Result<()> {
        self.ticks += 1;
        writeln!(self.out, "=== tick {} ===", self.ticks)?;
        write_control(&mut self.out, control)?;
        for (i, chain) in chains.iter().enumerate() {
            writeln!(self.out, "sample {i}: {} frames", chain.frame_count())?;
            for &addr in &chain.frames {
                let name = resolver.resolve(addr);
                writeln!(self.out, "  {} {}", hex_token(addr), name.as_deref().unwrap_or("??"))?;
            }
        }
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

fn write_control(out: &mut impl Write, control: &ControlSnapshot) -> io::Result<()> {
    writeln!(
        out,
        "ring: version={} compat={} index={} time_enabled={} time_running={}",
        control.version, control.compat_version, control.index, control.time_enabled, control.time_running
    )?;
    writeln!(
        out,
        "      head={} tail={} unread={} data_offset={} data_size={}",
        control.data_head,
        control.data_tail,
        control.data_head.saturating_sub(control.data_tail),
        control.data_offset,
        control.data_size
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use powerscope_common::PerfEventHeader;
    use std::rc::Rc;

    struct OnlyMain;

    impl Resolve for OnlyMain {
        fn resolve(&self, addr: u64) -> Option<Rc<str>> {
            (addr == 0x1000).then(|| Rc::from("main"))
        }
    }

    #[test]
    fn test_dump_lists_frames_with_symbols() {
        let control = ControlSnapshot { data_head: 96, data_tail: 32, data_size: 4096, ..Default::default() };
        let chain = CallChainRecord { header: PerfEventHeader::default(), frames: vec![0x1000, 0x2000] };

        let mut dump = DumpWriter::new(Vec::new());
        dump.write_tick(&control, &[chain], &OnlyMain).unwrap();
        let text = String::from_utf8(dump.into_inner()).unwrap();

        assert!(text.starts_with("=== tick 1 ===\n"));
        assert!(text.contains("head=96 tail=32 unread=64"));
        assert!(text.contains("sample 0: 2 frames"));
        assert!(text.contains("  0x0000000000001000 main\n"));
        assert!(text.contains("  0x0000000000002000 ??\n"));
    }
}
