//! 지리 정보 조회
//!
//! [`GeoLocator`]는 주소 문자열을 [`Country`]로 변환합니다. 조회 실패는
//! 항상 치명적이지 않으며, 호출자는 국가 필드를 비워 둔 채 진행합니다.
//!
//! [`TableGeoLocator`]는 JSON 네트워크 테이블을 읽어 최장 접두사 일치로
//! 답합니다.
//!
//! ```json
//! [
//!   { "network": "10.0.0.0/8", "country_code": "ZZ", "country_name": "Private" },
//!   { "network": "2001:db8::/32", "country_code": "ZZ", "country_name": "Documentation" }
//! ]
//! ```

use std::net::IpAddr;
use std::path::Path;

use ipnet::IpNet;
use serde::Deserialize;

use logwarden_core::types::Country;

use crate::error::LogPipelineError;

/// 주소 → 국가 조회
pub trait GeoLocator: Send + Sync {
    /// 주소의 국가를 조회합니다.
    fn lookup(&self, address: &str) -> Result<Country, LogPipelineError>;
}

/// 조회 테이블이 설정되지 않았을 때 사용하는 locator. 항상 실패합니다.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullGeoLocator;

impl GeoLocator for NullGeoLocator {
    fn lookup(&self, address: &str) -> Result<Country, LogPipelineError> {
        Err(LogPipelineError::GeoLookup {
            address: address.to_owned(),
            reason: "no geolocation table configured".to_owned(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct NetworkEntry {
    network: String,
    country_code: String,
    country_name: String,
}

#[derive(Debug, Clone)]
struct Network {
    net: IpNet,
    country: Country,
}

impl Network {
    /// `CIDR` 또는 단일 호스트 주소를 받습니다.
    fn parse(entry: NetworkEntry) -> Result<Self, LogPipelineError> {
        let net = match entry.network.parse::<IpNet>() {
            Ok(net) => net,
            Err(cidr_err) => entry
                .network
                .parse::<IpAddr>()
                .map(IpNet::from)
                .map_err(|_| LogPipelineError::Config {
                    field: "database.geoip_path".to_owned(),
                    reason: format!("invalid network '{}': {cidr_err}", entry.network),
                })?,
        };

        Ok(Self {
            net,
            country: Country::new(entry.country_code, entry.country_name),
        })
    }
}

/// JSON 네트워크 테이블 기반 locator
#[derive(Debug, Clone, Default)]
pub struct TableGeoLocator {
    networks: Vec<Network>,
}

impl TableGeoLocator {
    /// JSON 파일에서 테이블을 읽습니다.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LogPipelineError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| LogPipelineError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let locator = Self::from_json(&content)?;
        tracing::info!(
            path = %path.display(),
            networks = locator.len(),
            "loaded geolocation table"
        );
        Ok(locator)
    }

    /// JSON 문자열에서 테이블을 읽습니다.
    pub fn from_json(content: &str) -> Result<Self, LogPipelineError> {
        let entries: Vec<NetworkEntry> =
            serde_json::from_str(content).map_err(|e| LogPipelineError::Config {
                field: "database.geoip_path".to_owned(),
                reason: e.to_string(),
            })?;
        let mut networks = entries
            .into_iter()
            .map(Network::parse)
            .collect::<Result<Vec<_>, _>>()?;
        // 긴 접두사가 먼저 오도록 정렬
        networks.sort_by(|a, b| b.net.prefix_len().cmp(&a.net.prefix_len()));
        Ok(Self { networks })
    }

    /// 네트워크 항목 수
    pub fn len(&self) -> usize {
        self.networks.len()
    }

    /// 테이블이 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

impl GeoLocator for TableGeoLocator {
    fn lookup(&self, address: &str) -> Result<Country, LogPipelineError> {
        let ip: IpAddr = address
            .trim()
            .parse()
            .map_err(|e: std::net::AddrParseError| LogPipelineError::GeoLookup {
                address: address.to_owned(),
                reason: e.to_string(),
            })?;

        self.networks
            .iter()
            .find(|n| n.net.contains(&ip))
            .map(|n| n.country.clone())
            .ok_or_else(|| LogPipelineError::GeoLookup {
                address: address.to_owned(),
                reason: "address not in table".to_owned(),
            })
    }
}
