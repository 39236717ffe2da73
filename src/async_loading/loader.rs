//! FIFO of package requests processed under a time budget.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use super::{AsyncPackage, LoadCallback, LoadStatus};
use crate::linker::{LoadContext, Progress};
use crate::object::ObjectId;
use crate::util::{Error, Result, TimeBudget};

/// Queue of outstanding async package loads.
#[derive(Default)]
pub struct AsyncLoader {
    queue: VecDeque<AsyncPackage>,
    expected_hashes: HashMap<String, [u8; 32]>,
}

impl AsyncLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Packages still queued, head first.
    pub fn queued(&self) -> impl Iterator<Item = &AsyncPackage> {
        self.queue.iter()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_loading(&self, package_name: &str) -> bool {
        self.position(package_name).is_some()
    }

    fn position(&self, package_name: &str) -> Option<usize> {
        self.queue.iter().position(|p| p.name().eq_ignore_ascii_case(package_name))
    }

    /// Verify the file behind `package_name` against a SHA-256 digest the
    /// next time it is loaded.
    pub fn set_expected_hash(&mut self, package_name: &str, digest: [u8; 32]) {
        self.expected_hashes.insert(package_name.to_ascii_lowercase(), digest);
        if let Some(i) = self.position(package_name) {
            self.queue[i].set_expected_hash(digest);
        }
    }

    /// Queue a package. A request for a package already queued shares its
    /// entry and is notified with it.
    pub fn load_package_async(&mut self, package_name: &str, callback: Option<LoadCallback>) {
        let i = match self.position(package_name) {
            Some(i) => i,
            None => {
                let mut package = AsyncPackage::new(package_name);
                if let Some(&digest) = self.expected_hashes.get(&package_name.to_ascii_lowercase()) {
                    package.set_expected_hash(digest);
                }
                tracing::debug!(package = package_name, queued = self.queue.len() + 1, "async load requested");
                self.queue.push_back(package);
                self.queue.len() - 1
            }
        };
        if let Some(callback) = callback {
            self.queue[i].add_callback(callback);
        }
    }

    /// Progress of a queued package in `[0, 100]`.
    pub fn load_percentage(&self, cx: &LoadContext, package_name: &str) -> Option<f32> {
        self.position(package_name).map(|i| self.queue[i].percentage(cx))
    }

    /// Tick the head of the queue, moving on to later packages while time
    /// remains. `None` means no limit.
    pub fn process(&mut self, cx: &mut LoadContext, limit: Option<Duration>) -> LoadStatus {
        let mut budget = TimeBudget::new(limit, cx.config().time_check_granularity);
        cx.begin_async();
        while let Some(mut package) = self.queue.pop_front() {
            match self.tick_package(&mut package, cx, &mut budget) {
                Ok(Progress::Pending) => {
                    self.queue.push_front(package);
                    break;
                }
                Ok(Progress::Complete) => {
                    let result = package.package().ok_or_else(|| Error::other("package finished without an object"));
                    let _ = package.notify(result);
                }
                Err(e) => {
                    let _ = Self::fail(package, cx, e);
                }
            }
            if budget.exceeded() {
                break;
            }
        }
        cx.end_async();
        if self.queue.is_empty() {
            LoadStatus::Finished
        } else {
            LoadStatus::NotFinished
        }
    }

    /// Process until the queue is empty.
    pub fn flush(&mut self, cx: &mut LoadContext) {
        while self.process(cx, None) == LoadStatus::NotFinished {
            std::thread::yield_now();
        }
    }

    /// Drive one package to completion now, ahead of the rest of the queue.
    /// Queued callbacks for it still fire.
    pub fn load_package_now(&mut self, cx: &mut LoadContext, package_name: &str) -> Result<ObjectId> {
        let mut package = match self.position(package_name).and_then(|i| self.queue.remove(i)) {
            Some(package) => package,
            None => {
                let mut package = AsyncPackage::new(package_name);
                if let Some(&digest) = self.expected_hashes.get(&package_name.to_ascii_lowercase()) {
                    package.set_expected_hash(digest);
                }
                package
            }
        };
        let mut budget = TimeBudget::unlimited();
        cx.begin_async();
        let result = loop {
            match self.tick_package(&mut package, cx, &mut budget) {
                Ok(Progress::Complete) => break Ok(()),
                Ok(Progress::Pending) => std::thread::yield_now(),
                Err(e) => break Err(e),
            }
        };
        cx.end_async();
        match result {
            Ok(()) => {
                let result = package.package().ok_or_else(|| Error::other("package finished without an object"));
                package.notify(result)
            }
            Err(e) => Self::fail(package, cx, e),
        }
    }

    fn tick_package(
        &mut self,
        package: &mut AsyncPackage,
        cx: &mut LoadContext,
        budget: &mut TimeBudget,
    ) -> Result<Progress> {
        let mut requests = Vec::new();
        let progress = package.tick(cx, budget, &mut requests);
        for name in requests {
            if !name.eq_ignore_ascii_case(package.name()) {
                self.load_package_async(&name, None);
            }
        }
        progress
    }

    /// Clean up after a failed pass and notify the package's callbacks.
    fn fail(package: AsyncPackage, cx: &mut LoadContext, error: Error) -> Result<ObjectId> {
        tracing::error!(package = %package.name(), phase = %package.phase(), error = %error, "async load failed");
        cx.finish_constructed();
        cx.clear_loaded_queue();
        if error.is_fatal_for_loader() {
            if let Some(id) = package.linker() {
                cx.detach_linker(id);
            }
        }
        package.notify(Err(error))
    }
}
