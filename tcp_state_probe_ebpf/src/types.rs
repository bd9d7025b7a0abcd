//Shared types between kernel and userspace

/// Raw TCP state captured at a send/receive hook, pushed to userspace
/// through the perf event array.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawTcpEvent {
    pub family: u16,
    /// Network byte order
    pub src_port: u16,
    /// Network byte order
    pub dst_port: u16,
    pub length: u16,
    pub mark: u32,
    pub src_addr: [u8; 16],
    pub dst_addr: [u8; 16],
    pub snd_nxt: u32,
    pub snd_una: u32,
    pub snd_wnd: u32,
    pub rcv_wnd: u32,
    pub snd_cwnd: u32,
    pub ssthresh: u32,
    pub srtt_us: u32,
    pub mss_cache: u32,
    pub state: u8,
    pub direction: u8,
    pub _pad: [u8; 2],
}

// Address families as seen in sk_family
pub const AF_INET: u16 = 2;
pub const AF_INET6: u16 = 10;

// Direction markers, identical to the userspace log bytes
pub const DIR_OUTBOUND: u8 = b'o';
pub const DIR_INBOUND: u8 = b'i';
