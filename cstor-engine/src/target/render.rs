//! istgt.conf generation.
//!
//! The daemon's parser is strict about layout, so the output is built line
//! by line with two-space indentation and no trailing whitespace.

use super::TargetDefinition;

/// IQN prefix every target is exported under.
pub const NODE_BASE: &str = "iqn.2017-08.OpenEBS.cstor";

/// Port of the control portal.
pub const UNIT_CONTROL_PORT: u16 = 3261;

/// Port of the data portal.
pub const DATA_PORT: u16 = 3260;

/// Path of a volume's backing file, as both the config and the host see it.
pub fn backing_path(backing_dir: &str, volume_name: &str) -> String {
    format!("{}/{}", backing_dir.trim_end_matches('/'), volume_name)
}

/// Render a complete istgt.conf for one target.
///
/// `backing_dir` is where the backing file lives (`/tmp/cstor` in production).
/// The result is a pure function of its inputs.
pub fn render(target: &TargetDefinition, backing_dir: &str) -> String {
    let ip = &target.target_ip;
    let vol = &target.volume_name;
    let mut conf = String::new();

    conf.push_str("# Global section\n");
    conf.push_str("[Global]\n");
    conf.push_str(&format!("  NodeBase \"{}\"\n", NODE_BASE));
    conf.push_str("  PidFile \"/var/run/istgt.pid\"\n");
    conf.push_str("  AuthFile \"/usr/local/etc/istgt/auth.conf\"\n");
    conf.push_str("  LogFile \"/usr/local/etc/istgt/logfile\"\n");
    conf.push_str("  Luworkers 1\n");
    conf.push_str("  MediaDirectory \"/mnt\"\n");
    conf.push_str("  Timeout 60\n");
    conf.push_str("  NopInInterval 20\n");
    conf.push_str("  MaxR2T 16\n");
    conf.push_str("  DiscoveryAuthMethod None\n");
    conf.push_str("  DiscoveryAuthGroup None\n");
    conf.push_str("  MaxSessions 32\n");
    conf.push_str("  MaxConnections 4\n");
    conf.push_str("  FirstBurstLength 262144\n");
    conf.push_str("  MaxBurstLength 1048576\n");
    conf.push_str("  MaxRecvDataSegmentLength 262144\n");
    conf.push_str("  MaxOutstandingR2T 16\n");
    conf.push_str("  DefaultTime2Wait 2\n");
    conf.push_str("  DefaultTime2Retain 20\n");
    conf.push_str("  OperationalMode 0\n");
    conf.push('\n');

    conf.push_str("# UnitControl section\n");
    conf.push_str("[UnitControl]\n");
    conf.push_str("  AuthMethod None\n");
    conf.push_str("  AuthGroup None\n");
    conf.push_str(&format!("  Portal UC1 {}:{}\n", ip, UNIT_CONTROL_PORT));
    conf.push_str(&format!("  Netmask {}/8\n", ip));
    conf.push('\n');

    conf.push_str("# PortalGroup section\n");
    conf.push_str("[PortalGroup1]\n");
    conf.push_str(&format!("  Portal DA1 {}:{}\n", ip, DATA_PORT));
    conf.push('\n');

    conf.push_str("# InitiatorGroup section\n");
    conf.push_str("[InitiatorGroup1]\n");
    conf.push_str("  InitiatorName \"ALL\"\n");
    conf.push_str("  Netmask \"ALL\"\n");
    conf.push('\n');
    conf.push_str("[InitiatorGroup2]\n");
    conf.push_str("  InitiatorName \"None\"\n");
    conf.push_str("  Netmask \"None\"\n");
    conf.push('\n');

    conf.push_str("# LogicalUnit section\n");
    conf.push_str("[LogicalUnit2]\n");
    conf.push_str(&format!("  TargetName {}\n", vol));
    conf.push_str(&format!("  TargetAlias nicknamefor-{}\n", vol));
    conf.push_str("  Mapping PortalGroup1 InitiatorGroup1\n");
    conf.push_str("  AuthMethod None\n");
    conf.push_str("  AuthGroup None\n");
    conf.push_str("  UseDigest Auto\n");
    conf.push_str("  ReadOnly No\n");
    conf.push_str(&format!("  ReplicationFactor {}\n", target.replication_factor));
    conf.push_str(&format!("  ConsistencyFactor {}\n", target.consistency_factor));
    conf.push_str("  UnitType Disk\n");
    conf.push_str("  UnitOnline Yes\n");
    conf.push_str("  BlockLength 512\n");
    conf.push_str("  QueueDepth 32\n");
    conf.push_str("  Luworkers 1\n");
    conf.push_str(&format!("  UnitInquiry \"OpenEBS\" \"iscsi\" \"0\" \"{}\"\n", target.uid));
    conf.push_str("  PhysRecordLength 4096\n");
    conf.push_str(&format!(
        "  LUN0 Storage {} {} 32k\n",
        backing_path(backing_dir, vol),
        target.capacity
    ));
    conf.push_str("  LUN0 Option Unmap Disable\n");
    conf.push_str("  LUN0 Option WZero Disable\n");
    conf.push_str("  LUN0 Option ATS Disable\n");
    conf.push_str("  LUN0 Option XCOPY Disable\n");

    conf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> TargetDefinition {
        TargetDefinition {
            uid: "x".into(),
            volume_name: "v1".into(),
            capacity: "5G".into(),
            target_ip: "10.0.0.1".into(),
            replication_factor: 3,
            consistency_factor: 2,
        }
    }

    #[test]
    fn test_render_substitutions() {
        let conf = render(&target(), "/tmp/cstor");
        for expected in [
            "  NodeBase \"iqn.2017-08.OpenEBS.cstor\"\n",
            "  Portal UC1 10.0.0.1:3261\n",
            "  Netmask 10.0.0.1/8\n",
            "  Portal DA1 10.0.0.1:3260\n",
            "  TargetName v1\n",
            "  TargetAlias nicknamefor-v1\n",
            "  ReplicationFactor 3\n",
            "  ConsistencyFactor 2\n",
            "  UnitInquiry \"OpenEBS\" \"iscsi\" \"0\" \"x\"\n",
            "  LUN0 Storage /tmp/cstor/v1 5G 32k\n",
        ] {
            assert!(conf.contains(expected), "missing {expected:?}");
        }
        assert!(conf.ends_with("  LUN0 Option XCOPY Disable\n"));
        assert!(!conf.lines().any(|l| l.ends_with(' ')));
    }

    #[test]
    fn test_render_section_order() {
        let conf = render(&target(), "/tmp/cstor/");
        let order = [
            "[Global]",
            "[UnitControl]",
            "[PortalGroup1]",
            "[InitiatorGroup1]",
            "[InitiatorGroup2]",
            "[LogicalUnit2]",
        ];
        let positions: Vec<usize> = order.iter().map(|s| conf.find(s).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(conf.contains("LUN0 Storage /tmp/cstor/v1 5G 32k"));
    }

    #[test]
    fn test_backing_path_stays_in_backing_dir() {
        assert_eq!(backing_path("/tmp/cstor", "v1"), "/tmp/cstor/v1");
        assert_eq!(backing_path("/tmp/cstor/", "v1"), "/tmp/cstor/v1");

        let mut t = target();
        t.volume_name = "pvc-1".into();
        let conf = render(&t, "/tmp/cstor/");
        assert!(conf.contains("  LUN0 Storage /tmp/cstor/pvc-1 5G 32k\n"));
        assert!(!conf.contains("//"));
    }

    #[test]
    fn test_render_is_deterministic() {
        assert_eq!(render(&target(), "/tmp/cstor").as_bytes(), render(&target(), "/tmp/cstor").as_bytes());
    }
}
