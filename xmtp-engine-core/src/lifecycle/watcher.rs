use super::{app_became_active, connectivity_regained, ResyncReason};
use crate::app_state::AppState;
use crate::signal::Subscription;
use std::sync::Arc;
use tracing::{debug, info};

/// Listens for foreground and reconnect edges
///
/// Holds one subscription on the lifecycle signal and one on reachability.
/// Dropping the watcher removes both.
#[derive(Debug)]
pub struct LifecycleWatcher {
    subscriptions: Vec<Subscription>,
}

impl LifecycleWatcher {
    /// Subscribe to `app` and call `on_resync` on each recovering edge
    ///
    /// Edges seen before hydration completes are ignored.
    pub fn install<F>(app: &AppState, on_resync: F) -> Self
    where
        F: Fn(ResyncReason) + Send + Sync + 'static,
    {
        let on_resync = Arc::new(on_resync);

        let lifecycle_sub = {
            let hydration = app.hydration().clone();
            let on_resync = on_resync.clone();
            app.lifecycle().subscribe(move |previous, next| {
                if !app_became_active(*previous, *next) {
                    return;
                }
                if !hydration.get() {
                    debug!("App foregrounded before hydration, not resyncing");
                    return;
                }
                info!(from = %previous, "App foregrounded, resyncing");
                on_resync(ResyncReason::Foregrounded);
            })
        };

        let reachability_sub = {
            let hydration = app.hydration().clone();
            app.reachability().subscribe(move |previous, next| {
                if !connectivity_regained(*previous, *next) {
                    return;
                }
                if !hydration.get() {
                    debug!("Reconnected before hydration, not resyncing");
                    return;
                }
                info!("Back online, resyncing");
                on_resync(ResyncReason::Reconnected);
            })
        };

        Self {
            subscriptions: vec![lifecycle_sub, reachability_sub],
        }
    }

    /// Remove both listeners
    pub fn teardown(self) {
        for subscription in self.subscriptions {
            subscription.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::AppLifecycle;
    use parking_lot::Mutex;

    fn recording_watcher(app: &AppState) -> (LifecycleWatcher, Arc<Mutex<Vec<ResyncReason>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let watcher = LifecycleWatcher::install(app, move |reason| sink.lock().push(reason));
        (watcher, seen)
    }

    #[test]
    fn test_reconnect_edge_triggers_once() {
        let app = AppState::new();
        app.set_hydration_done(true);
        let (_watcher, seen) = recording_watcher(&app);

        app.set_internet_reachable(true);
        app.set_internet_reachable(true);
        app.set_internet_reachable(false);
        app.set_internet_reachable(true);

        assert_eq!(
            *seen.lock(),
            vec![ResyncReason::Reconnected, ResyncReason::Reconnected]
        );
    }

    #[test]
    fn test_foreground_edge_triggers() {
        let app = AppState::new();
        app.set_hydration_done(true);
        let (_watcher, seen) = recording_watcher(&app);

        app.set_lifecycle_state(AppLifecycle::Active);
        app.set_lifecycle_state(AppLifecycle::Inactive);
        app.set_lifecycle_state(AppLifecycle::Background);
        app.set_lifecycle_state(AppLifecycle::Active);

        assert_eq!(*seen.lock(), vec![ResyncReason::Foregrounded]);
    }

    #[test]
    fn test_edges_ignored_until_hydrated() {
        let app = AppState::new();
        let (_watcher, seen) = recording_watcher(&app);

        app.set_internet_reachable(true);
        app.set_lifecycle_state(AppLifecycle::Background);
        app.set_lifecycle_state(AppLifecycle::Active);
        assert!(seen.lock().is_empty());

        app.set_hydration_done(true);
        app.set_internet_reachable(false);
        app.set_internet_reachable(true);
        assert_eq!(*seen.lock(), vec![ResyncReason::Reconnected]);
    }

    #[test]
    fn test_teardown_removes_listeners() {
        let app = AppState::new();
        app.set_hydration_done(true);
        let (watcher, seen) = recording_watcher(&app);
        assert_eq!(app.reachability().listener_count(), 1);

        watcher.teardown();
        app.set_internet_reachable(true);

        assert_eq!(app.reachability().listener_count(), 0);
        assert_eq!(app.lifecycle().listener_count(), 0);
        assert!(seen.lock().is_empty());
    }
}
