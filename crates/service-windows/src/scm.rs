//! Service Control Manager backend.

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;

use tracing::{info, warn};
use windows_service::service::{
    Service as ScmService, ServiceAccess, ServiceConfig, ServiceErrorControl, ServiceInfo,
    ServiceStartType, ServiceType,
};
use windows_service::service_manager::{ServiceManager, ServiceManagerAccess};

use service_platform::{Config, Program, Result, Service, ServiceError};

use crate::dispatch;
use crate::eventlog;
use crate::record::{records_match, ServiceRecord, StartType};

pub const PLATFORM: &str = "Windows Service";

const ERROR_SERVICE_DOES_NOT_EXIST: i32 = 1060;

pub struct WindowsService {
    config: Config,
    record: ServiceRecord,
}

impl WindowsService {
    pub fn new(config: Config) -> Result<Self> {
        let config = config.resolved()?;
        let record = ServiceRecord::render(&config)?;
        Ok(Self { config, record })
    }

    fn connect(&self, access: ServiceManagerAccess) -> Result<ServiceManager> {
        ServiceManager::local_computer(None::<&str>, access)
            .map_err(|e| ServiceError::invocation("OpenSCManager", e))
    }

    fn open(&self, manager: &ServiceManager, access: ServiceAccess) -> Result<Option<ScmService>> {
        match manager.open_service(&self.config.name, access) {
            Ok(service) => Ok(Some(service)),
            Err(windows_service::Error::Winapi(e))
                if e.raw_os_error() == Some(ERROR_SERVICE_DOES_NOT_EXIST) =>
            {
                Ok(None)
            }
            Err(e) => Err(ServiceError::invocation(
                format!("OpenService {}", self.config.name),
                e,
            )),
        }
    }

    fn open_installed(&self, access: ServiceAccess) -> Result<ScmService> {
        let manager = self.connect(ServiceManagerAccess::CONNECT)?;
        self.open(&manager, access)?
            .ok_or_else(|| ServiceError::not_installed(&self.config.name))
    }

    fn service_info(&self) -> ServiceInfo {
        ServiceInfo {
            name: OsString::from(&self.config.name),
            display_name: OsString::from(&self.record.display_name),
            service_type: ServiceType::OWN_PROCESS,
            start_type: ServiceStartType::AutoStart,
            error_control: ServiceErrorControl::Normal,
            executable_path: PathBuf::from(&self.record.program),
            launch_arguments: self.record.arguments.iter().map(OsString::from).collect(),
            dependencies: vec![],
            // NULL would leave an existing account untouched on update
            account_name: Some(OsString::from(&self.record.account)),
            account_password: None,
        }
    }

    fn installed_record(installed: &ServiceConfig) -> ServiceRecord {
        let start_type = match installed.start_type {
            ServiceStartType::AutoStart => StartType::Automatic,
            ServiceStartType::OnDemand => StartType::OnDemand,
            ServiceStartType::Disabled => StartType::Disabled,
            _ => StartType::Other,
        };
        ServiceRecord::from_installed(
            installed.display_name.to_string_lossy().into_owned(),
            start_type,
            installed
                .account_name
                .as_ref()
                .map(|a| a.to_string_lossy().into_owned()),
            &installed.executable_path.to_string_lossy(),
        )
    }

    fn finish_create(&self, service: &ScmService) -> Result<()> {
        service
            .set_description(&self.record.description)
            .map_err(|e| ServiceError::invocation("ChangeServiceConfig2 description", e))?;
        eventlog::register_source(&self.config.name)
    }

    fn create(&self, manager: &ServiceManager, access: ServiceAccess) -> Result<()> {
        info!(
            "creating service {}: {}",
            self.config.name,
            self.record.command_line()
        );
        let service = manager
            .create_service(&self.service_info(), access)
            .map_err(|e| ServiceError::invocation("CreateService", e))?;

        if let Err(e) = self.finish_create(&service) {
            warn!("removing partially created service {}: {}", self.config.name, e);
            if let Err(del) = service.delete() {
                warn!("failed to delete service {}: {}", self.config.name, del);
            }
            return Err(e);
        }

        service
            .start(&[] as &[&OsStr])
            .map_err(|e| ServiceError::invocation(format!("StartService {}", self.config.name), e))
    }
}

impl Service for WindowsService {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn start(&self) -> Result<()> {
        info!("starting service: {}", self.config.name);
        self.open_installed(ServiceAccess::START)?
            .start(&[] as &[&OsStr])
            .map_err(|e| ServiceError::invocation(format!("StartService {}", self.config.name), e))
    }

    fn stop(&self) -> Result<()> {
        info!("stopping service: {}", self.config.name);
        self.open_installed(ServiceAccess::STOP)?
            .stop()
            .map(|_| ())
            .map_err(|e| ServiceError::invocation(format!("ControlService {}", self.config.name), e))
    }

    fn install_or_update_required(&self) -> Result<bool> {
        let manager = self.connect(ServiceManagerAccess::CONNECT)?;
        let Some(service) = self.open(&manager, ServiceAccess::QUERY_CONFIG)? else {
            return Ok(true);
        };
        let installed = service
            .query_config()
            .map_err(|e| ServiceError::invocation("QueryServiceConfig", e))?;
        Ok(!records_match(&self.record, &Self::installed_record(&installed)))
    }

    fn install_or_update(&self) -> Result<bool> {
        let manager =
            self.connect(ServiceManagerAccess::CONNECT | ServiceManagerAccess::CREATE_SERVICE)?;
        let access = ServiceAccess::QUERY_CONFIG
            | ServiceAccess::CHANGE_CONFIG
            | ServiceAccess::START
            | ServiceAccess::DELETE;

        let Some(service) = self.open(&manager, access)? else {
            self.create(&manager, access)?;
            info!("service installed: {}", self.config.name);
            return Ok(true);
        };

        let installed = service
            .query_config()
            .map_err(|e| ServiceError::invocation("QueryServiceConfig", e))?;
        if records_match(&self.record, &Self::installed_record(&installed)) {
            return Ok(false);
        }

        info!("updating service {}", self.config.name);
        service
            .change_config(&self.service_info())
            .map_err(|e| ServiceError::invocation("ChangeServiceConfig", e))?;
        service
            .set_description(&self.record.description)
            .map_err(|e| ServiceError::invocation("ChangeServiceConfig2 description", e))?;
        Ok(true)
    }

    fn uninstall(&self) -> Result<()> {
        info!("uninstalling service: {}", self.config.name);
        self.open_installed(ServiceAccess::DELETE)?
            .delete()
            .map_err(|e| ServiceError::invocation("DeleteService", e))?;
        eventlog::remove_source(&self.config.name)?;
        info!("service uninstalled: {}", self.config.name);
        Ok(())
    }

    fn run(&self, program: Box<dyn Program>) -> Result<()> {
        dispatch::run(&self.config.name, program)
    }
}
