use std::fmt;

/// Voltage domains understood by intel-undervolt, in declaration-index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Cpu,
    Gpu,
    CpuCache,
    SysAgent,
    AnalogIo,
}

impl Component {
    pub const ALL: [Component; 5] = [
        Component::Cpu,
        Component::Gpu,
        Component::CpuCache,
        Component::SysAgent,
        Component::AnalogIo,
    ];

    /// Maps the index of an `undervolt <index> ...` line to its component.
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn index(&self) -> u8 {
        match self {
            Component::Cpu => 0,
            Component::Gpu => 1,
            Component::CpuCache => 2,
            Component::SysAgent => 3,
            Component::AnalogIo => 4,
        }
    }

    /// Key used in the profile store.
    pub fn key(&self) -> &'static str {
        match self {
            Component::Cpu => "cpu",
            Component::Gpu => "gpu",
            Component::CpuCache => "cpu_cache",
            Component::SysAgent => "sys_agent",
            Component::AnalogIo => "analog_io",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.key() == key)
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// The five offsets (in mV) that make up one profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Offsets {
    pub cpu: i64,
    pub gpu: i64,
    pub cpu_cache: i64,
    pub sys_agent: i64,
    pub analog_io: i64,
}

impl Offsets {
    pub fn get(&self, component: Component) -> i64 {
        match component {
            Component::Cpu => self.cpu,
            Component::Gpu => self.gpu,
            Component::CpuCache => self.cpu_cache,
            Component::SysAgent => self.sys_agent,
            Component::AnalogIo => self.analog_io,
        }
    }

    pub fn set(&mut self, component: Component, value: i64) {
        match component {
            Component::Cpu => self.cpu = value,
            Component::Gpu => self.gpu = value,
            Component::CpuCache => self.cpu_cache = value,
            Component::SysAgent => self.sys_agent = value,
            Component::AnalogIo => self.analog_io = value,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Component, i64)> + '_ {
        Component::ALL.iter().map(move |c| (*c, self.get(*c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_index_table() {
        assert_eq!(Component::from_index(0), Some(Component::Cpu));
        assert_eq!(Component::from_index(2), Some(Component::CpuCache));
        assert_eq!(Component::from_index(4), Some(Component::AnalogIo));
        assert_eq!(Component::from_index(5), None);

        for c in Component::ALL {
            assert_eq!(Component::from_index(c.index()), Some(c));
            assert_eq!(Component::from_key(c.key()), Some(c));
        }
    }

    #[test]
    fn test_offsets_set_get() {
        let mut offsets = Offsets::default();
        offsets.set(Component::SysAgent, -20);
        assert_eq!(offsets.sys_agent, -20);
        assert_eq!(offsets.get(Component::SysAgent), -20);
        assert_eq!(offsets.iter().filter(|(_, v)| *v != 0).count(), 1);
    }
}
