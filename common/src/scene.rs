use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneSettings {
    pub physics: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelData {
    pub path: String,
    pub motion_paths: Vec<String>,
    pub build_physics: bool,
}

/// Everything a viewer needs to load before playback can start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneData {
    pub settings: SceneSettings,
    pub audio: String,
    pub models: Vec<ModelData>,
    pub camera_motion: Option<String>,
    pub end_frame: Option<f64>,
}

impl Default for SceneData {
    fn default() -> Self {
        SceneData {
            settings: SceneSettings { physics: true },
            audio: "/motion/daybreak_frontline.mp3".to_string(),
            models: vec![
                ModelData {
                    path: "/model/YYB Vintage Hatsune Miku.bpmx".to_string(),
                    motion_paths: vec!["/motion/daybreak_frontline_a.bvmd".to_string()],
                    build_physics: true,
                },
                ModelData {
                    path: "/model/YYB Hatsune Miku_10th.bpmx".to_string(),
                    motion_paths: vec!["/motion/daybreak_frontline_b.bvmd".to_string()],
                    build_physics: true,
                },
            ],
            camera_motion: Some("/motion/daybreak_frontline_camera.bvmd".to_string()),
            end_frame: None,
        }
    }
}

impl SceneData {
    /// Prefix every asset path with `base` (e.g. "http://localhost:20311").
    /// Paths that are already absolute URLs are left alone.
    pub fn resolve_urls(&mut self, base: &str) {
        let base = base.trim_end_matches('/');
        let resolve = |path: &mut String| {
            if !path.contains("://") {
                *path = format!("{}{}", base, path);
            }
        };

        resolve(&mut self.audio);
        for model in &mut self.models {
            resolve(&mut model.path);
            for motion_path in &mut model.motion_paths {
                resolve(motion_path);
            }
        }
        if let Some(camera_motion) = self.camera_motion.as_mut() {
            resolve(camera_motion);
        }
    }

    /// Every asset URL in load order: audio, models, their motions, then the camera motion
    pub fn asset_urls(&self) -> Vec<&str> {
        let mut urls = vec![self.audio.as_str()];
        for model in &self.models {
            urls.push(model.path.as_str());
            urls.extend(model.motion_paths.iter().map(String::as_str));
        }
        if let Some(camera_motion) = &self.camera_motion {
            urls.push(camera_motion.as_str());
        }
        urls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_urls_prefixes_relative_paths() {
        let mut scene = SceneData::default();
        scene.models[1].path = "https://cdn.example/model.bpmx".to_string();
        scene.resolve_urls("http://localhost:20311/");

        assert_eq!(scene.audio, "http://localhost:20311/motion/daybreak_frontline.mp3");
        assert_eq!(
            scene.models[0].motion_paths[0],
            "http://localhost:20311/motion/daybreak_frontline_a.bvmd"
        );
        assert_eq!(scene.models[1].path, "https://cdn.example/model.bpmx");
        assert_eq!(
            scene.camera_motion.as_deref(),
            Some("http://localhost:20311/motion/daybreak_frontline_camera.bvmd")
        );
    }

    #[test]
    fn test_scene_round_trips_with_camel_case_fields() {
        let json = r#"{
            "settings": { "physics": false },
            "audio": "/a.mp3",
            "models": [{ "path": "/m.bpmx", "motionPaths": ["/m.bvmd"], "buildPhysics": false }],
            "cameraMotion": null,
            "endFrame": 3600
        }"#;
        let scene: SceneData = serde_json::from_str(json).unwrap();
        assert_eq!(scene.end_frame, Some(3600.0));
        assert_eq!(scene.asset_urls(), vec!["/a.mp3", "/m.bpmx", "/m.bvmd"]);
    }
}
