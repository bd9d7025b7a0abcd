//Loads the kernel-side TCP hooks and feeds their events into the probe log

use std::{path::Path, sync::Arc};

use aya::{maps::perf::AsyncPerfEventArray, programs::KProbe, util::online_cpus, Bpf};
use bytes::BytesMut;
use tokio::task;

use crate::{
    config::Capture,
    probe::TcpProbe,
    snapshot::{Direction, RawTcpEvent},
};

/// Kprobe program name and the kernel function it is attached to.
const OUTBOUND_HOOKS: &[&str] = &["tcp_transmit_skb"];
const INBOUND_HOOKS: &[&str] = &["tcp_v4_do_rcv", "tcp_v6_do_rcv"];

pub struct ProbeCollector {
    ebpf: Bpf,
    probe: Arc<TcpProbe>,
}

impl ProbeCollector {
    /// Load the BPF object at `path` and attach the hooks `capture` asks for
    pub fn load(path: impl AsRef<Path>, probe: Arc<TcpProbe>) -> anyhow::Result<Self> {
        let mut ebpf = Bpf::load_file(path.as_ref())?;

        let capture = probe.config().direction;
        let mut hooks: Vec<&str> = Vec::new();
        if capture != Capture::Rcv {
            hooks.extend(OUTBOUND_HOOKS);
        }
        if capture != Capture::Snd {
            hooks.extend(INBOUND_HOOKS);
        }

        for name in hooks {
            let prog: &mut KProbe = ebpf
                .program_mut(name)
                .ok_or_else(|| anyhow::anyhow!("program {} not found in BPF object", name))?
                .try_into()?;
            prog.load()?;
            match prog.attach(name, 0) {
                Ok(_) => {}
                // tcp_v6_do_rcv is missing on kernels without IPv6
                Err(e) if name == "tcp_v6_do_rcv" => {
                    log::warn!("skipping {}: {}", name, e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            log::info!("attached kprobe {}", name);
        }

        log::info!("tcp probe hooks loaded and attached successfully");

        Ok(Self { ebpf, probe })
    }

    /// Start forwarding hook events to the log in background tasks
    pub async fn start_collection(&mut self) -> anyhow::Result<()> {
        let events = self
            .ebpf
            .take_map("EVENTS")
            .ok_or_else(|| anyhow::anyhow!("EVENTS map not found in BPF object"))?;
        let mut perf_array = AsyncPerfEventArray::try_from(events)?;

        let cpus = online_cpus()?;
        for cpu_id in cpus.iter().copied() {
            let mut buf = perf_array.open(cpu_id, None)?;
            let probe = self.probe.clone();

            task::spawn(async move {
                let mut buffers = vec![BytesMut::with_capacity(4096); 10];

                loop {
                    let events = match buf.read_events(&mut buffers).await {
                        Ok(events) => events,
                        Err(e) => {
                            log::error!("perf buffer on cpu {} failed: {}", cpu_id, e);
                            break;
                        }
                    };
                    if events.lost > 0 {
                        log::warn!("cpu {} lost {} hook events", cpu_id, events.lost);
                    }
                    for buf in buffers.iter_mut().take(events.read) {
                        Self::forward(&probe, buf.as_ref());
                    }
                }
            });
        }

        log::info!("Started event collection on {} CPUs", cpus.len());
        Ok(())
    }

    fn forward(probe: &TcpProbe, bytes: &[u8]) {
        let mut event = RawTcpEvent::default();
        if plain::copy_from_bytes(&mut event, bytes).is_err() {
            log::warn!("short hook event of {} bytes", bytes.len());
            return;
        }
        let direction = match Direction::from_byte(event.direction) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("{}", e);
                return;
            }
        };
        probe.submit(&event, direction);
    }

    pub fn probe(&self) -> &Arc<TcpProbe> {
        &self.probe
    }
}

impl Drop for ProbeCollector {
    fn drop(&mut self) {
        self.probe.shutdown();
    }
}
