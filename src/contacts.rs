use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::model::{Employee, EmployeeId};
use crate::ports::{ContactError, ContactResolver};

/// In-memory employee directory.
#[derive(Default)]
pub struct Directory {
    employees: DashMap<EmployeeId, Employee>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON array of employees.
    pub fn load_json(path: &Path) -> io::Result<Self> {
        let data = std::fs::read(path)?;
        let employees: Vec<Employee> =
            serde_json::from_slice(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let dir = Self::new();
        for employee in employees {
            dir.upsert(employee);
        }
        Ok(dir)
    }

    pub fn upsert(&self, employee: Employee) {
        self.employees.insert(employee.id, employee);
    }

    pub fn remove(&self, id: &EmployeeId) -> Option<Employee> {
        self.employees.remove(id).map(|(_, e)| e)
    }

    pub fn get(&self, id: &EmployeeId) -> Option<Employee> {
        self.employees.get(id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.employees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.employees.is_empty()
    }
}

#[async_trait]
impl ContactResolver for Directory {
    async fn email_for(&self, employee_id: EmployeeId) -> Result<String, ContactError> {
        self.employees
            .get(&employee_id)
            .map(|e| e.email.clone())
            .ok_or(ContactError::UnknownEmployee(employee_id))
    }
}

/// Read-through TTL cache in front of another resolver.
/// Failed lookups are never cached.
pub struct CachedContacts<R> {
    inner: R,
    ttl: Duration,
    entries: DashMap<EmployeeId, (String, Instant)>,
}

impl<R: ContactResolver> CachedContacts<R> {
    pub fn new(inner: R, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn invalidate(&self, id: &EmployeeId) {
        self.entries.remove(id);
    }

    pub fn cached_len(&self) -> usize {
        self.entries.len()
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

#[async_trait]
impl<R: ContactResolver> ContactResolver for CachedContacts<R> {
    async fn email_for(&self, employee_id: EmployeeId) -> Result<String, ContactError> {
        if let Some(entry) = self.entries.get(&employee_id) {
            let (email, stored) = entry.value();
            if stored.elapsed() < self.ttl {
                tracing::trace!("contact cache hit for {employee_id}");
                return Ok(email.clone());
            }
        }
        let email = self.inner.email_for(employee_id).await?;
        self.entries.insert(employee_id, (email.clone(), Instant::now()));
        Ok(email)
    }
}
