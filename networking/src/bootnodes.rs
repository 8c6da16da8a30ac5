use std::{fs::File, net::SocketAddr, sync::Arc};

use tracing::warn;

/// Supplies candidate peer addresses to dial. Discovery proper lives elsewhere;
/// the node only consumes its output through this trait.
pub trait PeerSource: Send + Sync {
    fn peer_addrs(&self) -> Vec<SocketAddr>;
}

impl PeerSource for Vec<SocketAddr> {
    fn peer_addrs(&self) -> Vec<SocketAddr> {
        self.clone()
    }
}

impl PeerSource for Arc<[SocketAddr]> {
    fn peer_addrs(&self) -> Vec<SocketAddr> {
        self.as_ref().to_vec()
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticPeers(Vec<SocketAddr>);

impl StaticPeers {
    pub fn new<T: Into<Vec<SocketAddr>>>(addrs: T) -> Self {
        StaticPeers(addrs.into())
    }

    /// Builds the list from command-line values, each either an address or a
    /// path to a YAML file holding a list of addresses.
    pub fn from_arguments<S: AsRef<str>>(args: &[S]) -> Self {
        StaticPeers(
            args.iter()
                .flat_map(|arg| parse_peer_argument(arg.as_ref()))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PeerSource for StaticPeers {
    fn peer_addrs(&self) -> Vec<SocketAddr> {
        self.0.clone()
    }
}

pub fn parse_peer_argument(arg: &str) -> Vec<SocketAddr> {
    if let Ok(addr) = arg.parse::<SocketAddr>() {
        return vec![addr];
    }

    let Ok(file) = File::open(arg) else {
        warn!(
            "value {arg:?} provided as peer is not recognized - it is not a valid socket address nor a valid path to a file containing peers."
        );

        return Vec::new();
    };

    let entries: Vec<String> = match serde_yaml::from_reader(file) {
        Ok(value) => value,
        Err(err) => {
            warn!("failed to read peers from {arg:?}: {err:?}");

            return Vec::new();
        }
    };

    if entries.is_empty() {
        warn!("provided file with peers {arg:?} is empty");
    }

    entries
        .iter()
        .filter_map(|entry| match entry.parse::<SocketAddr>() {
            Ok(addr) => Some(addr),
            Err(err) => {
                warn!("skipping peer entry {entry:?} in {arg:?}: {err}");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_plain_address() {
        let addrs = parse_peer_argument("127.0.0.1:30303");
        assert_eq!(addrs, vec!["127.0.0.1:30303".parse().unwrap()]);
    }

    #[test]
    fn parses_yaml_file_and_skips_garbage() {
        let path = std::env::temp_dir().join(format!("chainsync-peers-{}.yaml", std::process::id()));
        let mut file = File::create(&path).unwrap();
        writeln!(file, "- 10.0.0.1:30303\n- not-an-address\n- 10.0.0.2:30304").unwrap();

        let peers = StaticPeers::from_arguments(&[path.to_string_lossy()]);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(
            peers.peer_addrs(),
            vec![
                "10.0.0.1:30303".parse::<SocketAddr>().unwrap(),
                "10.0.0.2:30304".parse().unwrap()
            ]
        );
    }

    #[test]
    fn unknown_argument_yields_nothing() {
        assert!(parse_peer_argument("/definitely/not/here.yaml").is_empty());
    }
}
